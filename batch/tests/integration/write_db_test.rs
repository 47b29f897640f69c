use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use batch::concurrency::shutdown::create_shutdown_channel;
use batch::error::{ErrorCategory, ErrorKind};
use batch::executor::{BatchCommand, WriteDbExecutor, run_executor};
use batch::test_utils::source::MemoryDataSource;
use batch::test_utils::table::TableFixture;
use batch_config::shared::{Operation, PipelineConfig, ShardingConfig, WriteDbConfig};
use batch_telemetry::tracing::init_test_tracing;
use tempfile::TempDir;

use crate::common::{pipeline_config, write_data_file};

fn executor(
    source: &MemoryDataSource,
    operation: Operation,
    files: Vec<PathBuf>,
    config: WriteDbConfig,
    pipeline: PipelineConfig,
    sharding: ShardingConfig,
) -> WriteDbExecutor<MemoryDataSource> {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    WriteDbExecutor::new(
        source.clone(),
        BatchCommand::new(operation, "t", files),
        config,
        pipeline,
        sharding,
        shutdown_rx,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_in_batches_rows_end_to_end_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n2,b\n3,c\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);

    let report = run_executor(executor(
        &source,
        Operation::DeleteIn,
        vec![file],
        WriteDbConfig::default(),
        pipeline_config(1, 2),
        ShardingConfig::default(),
    ))
    .await;

    assert!(report.is_success(), "{:?}", report.result);
    assert_eq!(
        source.executed(),
        vec![
            "DELETE FROM `t` WHERE (id) IN ((1),(2));",
            "DELETE FROM `t` WHERE (id) IN ((3));",
        ]
    );

    let debug_info = report.debug_info;
    assert_eq!(debug_info.remaining_rows(), 0);
    assert_eq!(debug_info.processed_rows(), 3);
    let stat = debug_info.sql_stat("delete_in");
    assert_eq!(stat.count(), 2);
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn import_skips_header_and_maps_nulls_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "id,name\n1,a\n2,\\N\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);

    let config = WriteDbConfig {
        with_header: true,
        ..WriteDbConfig::default()
    };
    let report = run_executor(executor(
        &source,
        Operation::Import,
        vec![file],
        config,
        pipeline_config(1, 10),
        ShardingConfig::default(),
    ))
    .await;

    assert!(report.is_success(), "{:?}", report.result);
    assert_eq!(
        source.executed(),
        vec!["INSERT INTO `t` VALUES (1,'a'),(2,NULL);"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn every_row_is_applied_exactly_once_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let files: Vec<_> = (0..4)
        .map(|part| {
            let content: String = (part * 250..(part + 1) * 250)
                .map(|id| format!("{id},n{id}\n"))
                .collect();
            write_data_file(&dir, &format!("part_{part}.csv"), &content)
        })
        .collect();

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);

    let report = run_executor(executor(
        &source,
        Operation::Import,
        files,
        WriteDbConfig::default(),
        pipeline_config(4, 7),
        ShardingConfig::default(),
    ))
    .await;
    assert!(report.is_success(), "{:?}", report.result);

    let mut seen: HashMap<usize, usize> = HashMap::new();
    for statement in source.executed() {
        let values = statement
            .strip_prefix("INSERT INTO `t` VALUES (")
            .and_then(|rest| rest.strip_suffix(");"))
            .unwrap();
        for row in values.split("),(") {
            let id = row.split(',').next().unwrap().parse().unwrap();
            *seen.entry(id).or_default() += 1;
        }
    }

    assert_eq!(seen.len(), 1000);
    assert!(seen.values().all(|count| *count == 1));
    assert_eq!(report.debug_info.file_stats().len(), 4);
    assert_eq!(report.debug_info.remaining_rows(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_delete_never_mixes_shards_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n2,b\n3,c\n4,d\n5,e\n6,f\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t")
        .shard("G0", "t_0")
        .shard("G1", "t_1")
        .partition("id", 2, 1)
        .register(&source);

    let sharding = ShardingConfig {
        enabled: true,
        ..ShardingConfig::default()
    };
    let report = run_executor(executor(
        &source,
        Operation::DeleteIn,
        vec![file],
        WriteDbConfig::default(),
        pipeline_config(2, 2),
        sharding,
    ))
    .await;
    assert!(report.is_success(), "{:?}", report.result);

    let executed = source.executed();
    for id in 1..=6 {
        let shard = id % 2;
        let containing: Vec<_> = executed
            .iter()
            .filter(|statement| statement.contains(&format!("({id})")))
            .collect();

        assert_eq!(containing.len(), 1, "row {id} in {executed:?}");
        assert!(containing[0].starts_with(&format!("/!TDDL:node='G{shard}'*/ DELETE FROM `t_{shard}`")));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_operation_requires_partition_key_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t")
        .shard("G0", "t_0")
        .register(&source);

    let sharding = ShardingConfig {
        enabled: true,
        ..ShardingConfig::default()
    };
    let report = run_executor(executor(
        &source,
        Operation::Import,
        vec![file],
        WriteDbConfig::default(),
        pipeline_config(1, 2),
        sharding,
    ))
    .await;

    let err = report.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingTableMetadata);
    assert!(source.executed().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_requires_primary_key_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::new("t")
        .column("id", "int")
        .column("name", "varchar")
        .register(&source);

    let report = run_executor(executor(
        &source,
        Operation::Delete,
        vec![file],
        WriteDbConfig::default(),
        pipeline_config(1, 2),
        ShardingConfig::default(),
    ))
    .await;

    let err = report.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingTableMetadata);
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(source.executed().is_empty());
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_input_file_is_rejected_before_any_query_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);

    let report = run_executor(executor(
        &source,
        Operation::DeleteIn,
        vec![dir.path().join("missing.csv")],
        WriteDbConfig::default(),
        pipeline_config(1, 2),
        ShardingConfig::default(),
    ))
    .await;

    assert_eq!(report.result.unwrap_err().kind(), ErrorKind::ConfigError);
    assert!(source.queries().is_empty());
    assert_eq!(source.connections_opened(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_pipeline_config_is_rejected_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n");
    let source = MemoryDataSource::new("shop");

    for pipeline in [
        PipelineConfig {
            ring_buffer_size: 6,
            ..pipeline_config(1, 2)
        },
        pipeline_config(0, 2),
    ] {
        let report = run_executor(executor(
            &source,
            Operation::DeleteIn,
            vec![file.clone()],
            WriteDbConfig::default(),
            pipeline,
            ShardingConfig::default(),
        ))
        .await;

        assert_eq!(report.result.unwrap_err().category(), ErrorCategory::Configuration);
    }
    assert_eq!(source.connections_opened(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_statement_keeps_applied_rows_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n2,b\n3,c\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.fail_when("((2))", ErrorKind::QueryFailed);

    let report = run_executor(executor(
        &source,
        Operation::DeleteIn,
        vec![file],
        WriteDbConfig::default(),
        pipeline_config(1, 1),
        ShardingConfig::default(),
    ))
    .await;

    let err = report.result.unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::QueryFailed));
    assert_eq!(source.executed(), vec!["DELETE FROM `t` WHERE (id) IN ((1));"]);
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_the_run_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let file = write_data_file(&dir, "t.csv", "1,a\n2,b\n");

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let executor = WriteDbExecutor::new(
        source.clone(),
        BatchCommand::new(Operation::DeleteIn, "t", vec![file]),
        WriteDbConfig::default(),
        pipeline_config(1, 2),
        ShardingConfig::default(),
        shutdown_rx,
    );
    shutdown_tx.shutdown().unwrap();

    let report = run_executor(executor).await;

    let err = report.result.unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::OperationCancelled));
    assert!(source.executed().is_empty());
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_an_import_midway_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let content: String = (0..200).map(|id| format!("{id},n{id}\n")).collect();
    let file = write_data_file(&dir, "t.csv", &content);

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.delay_execute(Duration::from_millis(20));
    let executed = source.executed_notify();

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let executor = WriteDbExecutor::new(
        source.clone(),
        BatchCommand::new(Operation::Import, "t", vec![file]),
        WriteDbConfig::default(),
        pipeline_config(1, 1),
        ShardingConfig::default(),
        shutdown_rx,
    );
    let run = tokio::spawn(run_executor(executor));

    executed.notified().await;
    shutdown_tx.shutdown().unwrap();
    let report = run.await.unwrap();

    let err = report.result.unwrap_err();
    assert!(
        matches!(
            err.kind(),
            ErrorKind::PipelineHalted | ErrorKind::OperationCancelled
        ),
        "{err}"
    );
    assert!(source.executed().len() < 200);
    assert_eq!(report.debug_info.running_workers(), Some(0));
    assert_eq!(source.connections_opened(), source.connections_closed());
}
