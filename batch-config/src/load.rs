use std::{
    borrow::Cow,
    fmt, io,
    path::{Path, PathBuf},
};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Default location of the batch tool's configuration files.
const CONFIGURATION_DIR: &str = "configuration";

const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// `BATCH_CONNECTION__HOST=db1` overrides `connection.host`.
const ENV_PREFIX: &str = "BATCH";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";

/// `BATCH_COMMAND__FILES=a.csv,b.csv` yields two input files.
const LIST_SEPARATOR: &str = ",";

/// A configuration root that can be layered from files and `BATCH_` variables.
pub trait Config {
    /// Dotted keys whose environment overrides are comma-separated lists, such as
    /// `command.files`.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Clone, Copy)]
enum ConfigFileKind {
    /// `base.*`, required for every run.
    Base,
    /// `{environment}.*`, layered over the base file when present.
    Environment(Environment),
}

impl ConfigFileKind {
    fn stem(&self) -> Cow<'static, str> {
        match self {
            ConfigFileKind::Base => Cow::Borrowed("base"),
            ConfigFileKind::Environment(env) => Cow::Borrowed(env.as_str()),
        }
    }
}

impl fmt::Display for ConfigFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFileKind::Base => f.write_str("base configuration"),
            ConfigFileKind::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Failure to assemble the tool configuration, before any validation runs.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// `--config-dir` (or `./configuration`) is not a directory.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// No `base.*` file was found; `attempted` lists every path tried.
    #[error("could not locate {kind_description} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        kind_description: String,
        directory: PathBuf,
        attempted: String,
    },

    /// A base or environment file has a syntax error.
    #[error("failed to load {kind_description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        kind_description: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    /// Files and overrides merged, but a section has the wrong shape (an unknown operation,
    /// a string where a count is expected).
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    /// `BATCH_ENVIRONMENT` names an unknown environment.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    /// A `BATCH_` override could not be merged.
    #[error("failed to initialize configuration builder: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),
}

/// Loads configuration from `./configuration`.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(&base_path.join(CONFIGURATION_DIR))
}

/// Loads hierarchical configuration from `directory`.
///
/// Reads `base.(yaml|yml|json)`, then the `BATCH_ENVIRONMENT` file (`dev.yaml` by default) when
/// present, then `BATCH_` variables. Command-line flags are applied by the caller afterwards.
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    let base_file = find_configuration_file(directory, ConfigFileKind::Base)?;

    let mut builder =
        rust_cli_config::Config::builder().add_source(rust_cli_config::File::from(base_file.clone()));
    validate_configuration_source(&builder, ConfigFileKind::Base, &base_file)?;

    // A one-off run usually only ships `base.yaml`.
    let environment_kind = ConfigFileKind::Environment(environment);
    if let Ok(environment_file) = find_configuration_file(directory, environment_kind) {
        builder = builder.add_source(rust_cli_config::File::from(environment_file.clone()));
        validate_configuration_source(&builder, environment_kind, &environment_file)?;
    }

    let mut environment_source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn find_configuration_file(
    directory: &Path,
    kind: ConfigFileKind,
) -> Result<PathBuf, LoadConfigError> {
    let stem = kind.stem();
    let mut attempted_paths = Vec::with_capacity(CONFIG_FILE_EXTENSIONS.len());

    for extension in CONFIG_FILE_EXTENSIONS {
        let path = directory.join(format!("{stem}.{extension}"));
        attempted_paths.push(path.clone());

        if path.is_file() {
            return Ok(path);
        }
    }

    let attempted = attempted_paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        kind_description: kind.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

fn validate_configuration_source(
    builder: &ConfigBuilder<DefaultState>,
    kind: ConfigFileKind,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            kind_description: kind.to_string(),
            path: path.to_path_buf(),
            source,
        })
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        table: String,
        consumers: usize,
    }

    impl Config for Sample {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = load_config_from::<Sample>(&missing).unwrap_err();
        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }

    #[test]
    fn missing_base_file_lists_attempted_paths() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_config_from::<Sample>(dir.path()).unwrap_err();
        match err {
            LoadConfigError::ConfigurationFileMissing { attempted, .. } => {
                assert!(attempted.contains("base.yaml"));
                assert!(attempted.contains("base.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Regional {
        table: String,
        region: String,
    }

    impl Config for Regional {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn batch_variables_override_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "table: orders\nregion: eu\n",
        )
        .unwrap();

        // SAFETY: `BATCH_REGION` is only touched by this test.
        unsafe { std::env::set_var("BATCH_REGION", "us") };
        let regional = load_config_from::<Regional>(dir.path());
        unsafe { std::env::remove_var("BATCH_REGION") };

        let regional = regional.unwrap();
        assert_eq!(regional.table, "orders");
        assert_eq!(regional.region, "us");
    }

    #[test]
    fn base_file_alone_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "table: orders\nconsumers: 8\n",
        )
        .unwrap();

        let sample = load_config_from::<Sample>(dir.path()).unwrap();
        assert_eq!(sample.table, "orders");
        assert_eq!(sample.consumers, 8);
    }
}
