use std::collections::BTreeMap;

use batch::concurrency::shutdown::create_shutdown_channel;
use batch::error::ErrorKind;
use batch::executor::{BatchCommand, ExportExecutor, WriteDbExecutor, run_executor};
use batch::test_utils::source::MemoryDataSource;
use batch::test_utils::table::TableFixture;
use batch_config::shared::{
    EncryptionConfig, EncryptionMode, ExportConfig, MaskConfig, Operation, ShardingConfig,
    WriteDbConfig,
};
use batch_telemetry::tracing::init_test_tracing;
use secrecy::SecretString;
use tempfile::TempDir;

use crate::common::{export_config, pipeline_config, read_lines};

const COLUMNS: [&str; 2] = ["id", "name"];

fn aes(key: &str) -> EncryptionConfig {
    EncryptionConfig {
        mode: EncryptionMode::Aes,
        key: Some(SecretString::new(key.to_string())),
    }
}

fn source_with_rows() -> MemoryDataSource {
    let source = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&source);
    source.on_query(
        "SELECT `id`,`name` FROM `t`",
        &COLUMNS,
        vec![
            vec![Some("1"), Some("a,b")],
            vec![Some("2"), None],
            vec![Some("3"), Some("O'Neil")],
        ],
    );
    source
}

fn export(source: &MemoryDataSource, config: ExportConfig) -> ExportExecutor<MemoryDataSource> {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    ExportExecutor::new(
        source.clone(),
        "t",
        config,
        pipeline_config(1, 16),
        ShardingConfig::default(),
        shutdown_rx,
    )
}

fn import(
    source: &MemoryDataSource,
    dir: &TempDir,
    config: WriteDbConfig,
) -> WriteDbExecutor<MemoryDataSource> {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    WriteDbExecutor::new(
        source.clone(),
        BatchCommand::new(Operation::Import, "t", vec![dir.path().join("t_0")]),
        config,
        pipeline_config(1, 10),
        ShardingConfig::default(),
        shutdown_rx,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn encrypted_export_imports_as_plaintext_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let exporting = source_with_rows();

    let config = ExportConfig {
        encryption: aes("round-trip-key"),
        ..export_config(&dir)
    };
    let report = run_executor(export(&exporting, config)).await;
    assert!(report.is_success(), "{:?}", report.result);

    let lines = read_lines(&dir.path().join("t_0"));
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| !line.contains("a,b") && !line.contains("Neil")));
    assert!(lines[1].ends_with(",\\N"));

    let importing = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&importing);
    let config = WriteDbConfig {
        encryption: aes("round-trip-key"),
        ..WriteDbConfig::default()
    };
    let report = run_executor(import(&importing, &dir, config)).await;

    assert!(report.is_success(), "{:?}", report.result);
    assert_eq!(
        importing.executed(),
        vec!["INSERT INTO `t` VALUES (1,'a,b'),(2,NULL),(3,'O\\'Neil');"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn import_with_the_wrong_key_fails_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let config = ExportConfig {
        encryption: aes("export-key"),
        ..export_config(&dir)
    };
    let report = run_executor(export(&source_with_rows(), config)).await;
    assert!(report.is_success(), "{:?}", report.result);

    let importing = MemoryDataSource::new("shop");
    TableFixture::id_name("t").register(&importing);
    let config = WriteDbConfig {
        encryption: aes("another-key"),
        ..WriteDbConfig::default()
    };
    let report = run_executor(import(&importing, &dir, config)).await;

    let err = report.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncryptionError);
    assert!(importing.executed().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn masked_columns_are_exported_masked_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let source = source_with_rows();

    let config = ExportConfig {
        masks: BTreeMap::from([(
            "name".to_string(),
            MaskConfig::Hiding {
                show_end: Some(1),
                show_regions: Vec::new(),
            },
        )]),
        ..export_config(&dir)
    };
    let report = run_executor(export(&source, config)).await;
    assert!(report.is_success(), "{:?}", report.result);

    assert_eq!(
        read_lines(&dir.path().join("t_0")),
        vec!["1,**b", "2,\\N", "3,*****l"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn mask_on_unknown_column_fails_pre_check_test() {
    init_test_tracing();
    let dir = TempDir::new().unwrap();

    let config = ExportConfig {
        masks: BTreeMap::from([("email".to_string(), MaskConfig::Hash { salt: None })]),
        ..export_config(&dir)
    };
    let report = run_executor(export(&source_with_rows(), config)).await;

    let err = report.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
