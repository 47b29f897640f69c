use std::path::Path;

use batch::concurrency::shutdown::create_shutdown_channel;
use batch::error::{ErrorCategory, ErrorKind};
use batch::executor::{ExportExecutor, run_executor};
use batch::test_utils::source::MemoryDataSource;
use batch::test_utils::table::TableFixture;
use batch_config::shared::{ExportConfig, ExportWay, ShardingConfig};
use batch_telemetry::tracing::init_test_tracing;
use tempfile::TempDir;

use crate::common::{as_values, export_config, id_name_rows, pipeline_config, read_lines};

const COLUMNS: [&str; 2] = ["id", "name"];

fn executor(
    source: &MemoryDataSource,
    config: ExportConfig,
    sharding: ShardingConfig,
) -> ExportExecutor<MemoryDataSource> {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    ExportExecutor::new(
        source.clone(),
        "t",
        config,
        pipeline_config(2, 16),
        sharding,
        shutdown_rx,
    )
}

fn sharded() -> ShardingConfig {
    ShardingConfig {
        enabled: true,
        ..ShardingConfig::default()
    }
}

fn sharded_source() -> MemoryDataSource {
    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t")
        .shard("G0", "t_0")
        .shard("G1", "t_1")
        .register(&source);
    source.on_query("FROM `t_0`", &COLUMNS, as_values(&id_name_rows(0, 5)));
    source.on_query("FROM `t_1`", &COLUMNS, as_values(&id_name_rows(5, 5)));
    source
}

fn line_count(path: &Path) -> usize {
    read_lines(path).len()
}

#[tokio::test(flavor = "multi_thread")]
async fn fixed_file_num_splits_by_row_count_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.on_count("SELECT COUNT(*) FROM `t`", 1000);
    source.on_query(
        "SELECT `id`,`name` FROM `t`",
        &COLUMNS,
        as_values(&id_name_rows(0, 1000)),
    );

    let config = ExportConfig {
        way: ExportWay::FixedFileNum(3),
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, ShardingConfig::default())).await;
    assert!(report.is_success(), "{:?}", report.result);

    let counts: Vec<_> = (0..3)
        .map(|seq| line_count(&dir.path().join(format!("t_0-{seq}"))))
        .collect();
    assert_eq!(counts, vec![334, 334, 332]);
    assert!(!dir.path().join("t_0-3").exists());

    let stats: Vec<_> = report
        .debug_info
        .file_stats()
        .iter()
        .map(|stat| stat.rows())
        .collect();
    assert_eq!(stats, vec![334, 334, 332]);
    assert_eq!(report.debug_info.processed_rows(), 1000);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_row_count_is_fatal_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.fail_when("COUNT(*)", ErrorKind::QueryFailed);

    let config = ExportConfig {
        way: ExportWay::FixedFileNum(3),
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, ShardingConfig::default())).await;

    let err = report.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RowCountUnavailable);
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn max_lines_rolls_files_with_header_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.on_query(
        "SELECT `id`,`name` FROM `t`",
        &COLUMNS,
        vec![
            vec![Some("1"), Some("a,b")],
            vec![Some("2"), None],
            vec![Some("3"), Some("c")],
        ],
    );

    let config = ExportConfig {
        way: ExportWay::MaxLineNumInSingleFile(2),
        with_header: true,
        filename_prefix: "out_".to_string(),
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, ShardingConfig::default())).await;
    assert!(report.is_success(), "{:?}", report.result);

    assert_eq!(
        read_lines(&dir.path().join("out_t_0-0")),
        vec!["id,name", "1,\"a,b\"", "2,\\N"]
    );
    assert_eq!(read_lines(&dir.path().join("out_t_0-1")), vec!["id,name", "3,c"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_export_writes_one_file_per_shard_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let source = sharded_source();

    let report = run_executor(executor(&source, export_config(&dir), sharded())).await;
    assert!(report.is_success(), "{:?}", report.result);

    assert_eq!(
        read_lines(&dir.path().join("t_0")),
        vec!["0,name_0", "1,name_1", "2,name_2", "3,name_3", "4,name_4"]
    );
    assert_eq!(line_count(&dir.path().join("t_1")), 5);

    let queries = source.queries();
    assert!(queries.contains(&"/!TDDL:node='G0'*/ SELECT `id`,`name` FROM `t_0`;".to_string()));
    assert!(queries.contains(&"/!TDDL:node='G1'*/ SELECT `id`,`name` FROM `t_1`;".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_fixed_file_export_fans_into_k_files_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let source = sharded_source();

    let config = ExportConfig {
        way: ExportWay::FixedFileNum(3),
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, sharded())).await;
    assert!(report.is_success(), "{:?}", report.result);

    let mut ids: Vec<usize> = (0..3)
        .flat_map(|index| read_lines(&dir.path().join(format!("t_{index}"))))
        .map(|line| line.split(',').next().unwrap().parse().unwrap())
        .collect();
    ids.sort();

    assert_eq!(ids, (0..10).collect::<Vec<_>>());
    assert!(!dir.path().join("t_3").exists());
    assert_eq!(report.debug_info.remaining_rows(), 0);
    assert_eq!(source.connections_opened(), source.connections_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn ordered_export_reads_the_logical_table_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let source = sharded_source();
    source.on_query(
        "FROM `t` ORDER BY id DESC",
        &COLUMNS,
        vec![vec![Some("2"), Some("b")], vec![Some("1"), Some("a")]],
    );

    let config = ExportConfig {
        order_by: vec!["id".to_string()],
        ascending: false,
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, sharded())).await;
    assert!(report.is_success(), "{:?}", report.result);

    assert_eq!(read_lines(&dir.path().join("t_0")), vec!["2,b", "1,a"]);
    assert!(!dir.path().join("t_1").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_export_config_is_rejected_before_any_query_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let source = sharded_source();

    for config in [
        ExportConfig {
            way: ExportWay::MaxLineNumInSingleFile(0),
            ..export_config(&dir)
        },
        ExportConfig {
            separator: "|@|".to_string(),
            ..export_config(&dir)
        },
        ExportConfig {
            path: format!("{}/missing/", dir.path().display()),
            ..export_config(&dir)
        },
    ] {
        let report = run_executor(executor(&source, config, ShardingConfig::default())).await;
        assert_eq!(report.result.unwrap_err().category(), ErrorCategory::Configuration);
    }

    assert!(source.queries().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_order_by_column_is_rejected_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let source = sharded_source();

    let config = ExportConfig {
        order_by: vec!["created_at".to_string()],
        ..export_config(&dir)
    };
    let report = run_executor(executor(&source, config, ShardingConfig::default())).await;

    assert_eq!(report.result.unwrap_err().kind(), ErrorKind::ConfigError);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
