use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure taxonomy of a migration run.
///
/// Backend adapters report plain `anyhow` errors; every one of those is a
/// transient remote error as far as the retry executor is concerned. Only the
/// variants below ever leave the pipeline.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A remote call kept failing after the whole retry budget was spent.
    #[error("{label}: gave up after {attempts} attempt(s): {source}")]
    ExhaustedRetry {
        label: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// A field value looked like a reference but could not be decoded.
    #[error("invalid reference in field `{field}`: {reason}")]
    PermanentValidation { field: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("local staging i/o failed for {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl MigrateError {
    pub fn exhausted(label: &str, attempts: u32, last: anyhow::Error) -> Self {
        MigrateError::ExhaustedRetry {
            label: label.to_string(),
            attempts,
            source: last.into(),
        }
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        MigrateError::PermanentValidation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Short label used in log lines and skip reports.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::ExhaustedRetry { .. } => "exhausted_retry",
            MigrateError::PermanentValidation { .. } => "permanent_validation",
            MigrateError::Config(_) => "config",
            MigrateError::Staging { .. } => "staging_io",
        }
    }
}

pub type MigrateResult<T> = std::result::Result<T, MigrateError>;
