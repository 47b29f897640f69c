use std::fmt;
use std::io::Error;

/// Name of the environment variable selecting the runtime environment.
const BATCH_ENVIRONMENT_ENV_NAME: &str = "BATCH_ENVIRONMENT";

const DEV_ENV_NAME: &str = "dev";

const STAGING_ENV_NAME: &str = "staging";

const PROD_ENV_NAME: &str = "prod";

/// Runtime environment of the batch tool.
///
/// Selects which `configuration/{environment}.*` file is layered on top of the base file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local runs against development databases.
    Dev,
    /// Rehearsal runs against a staging copy.
    Staging,
    /// Production runs.
    Prod,
}

impl Environment {
    /// Loads the environment from `BATCH_ENVIRONMENT`, defaulting to [`Environment::Dev`].
    pub fn load() -> Result<Environment, Error> {
        std::env::var(BATCH_ENVIRONMENT_ENV_NAME)
            .unwrap_or_else(|_| DEV_ENV_NAME.into())
            .try_into()
    }

    /// Returns the file stem used for this environment's configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => DEV_ENV_NAME,
            Environment::Staging => STAGING_ENV_NAME,
            Environment::Prod => PROD_ENV_NAME,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    /// Parses an environment name case-insensitively.
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            DEV_ENV_NAME => Ok(Self::Dev),
            STAGING_ENV_NAME => Ok(Self::Staging),
            PROD_ENV_NAME => Ok(Self::Prod),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use `{DEV_ENV_NAME}`, `{STAGING_ENV_NAME}` or `{PROD_ENV_NAME}`.",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!(Environment::try_from("PROD".to_string()).unwrap(), Environment::Prod);
        assert_eq!(Environment::try_from("Staging".to_string()).unwrap(), Environment::Staging);
        assert_eq!(Environment::try_from("dev".to_string()).unwrap(), Environment::Dev);
    }

    #[test]
    fn rejects_unknown_names() {
        let err = Environment::try_from("qa".to_string()).unwrap_err();
        assert!(err.to_string().contains("qa is not a supported environment"));
    }
}
