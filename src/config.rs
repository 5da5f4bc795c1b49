//! Run configuration, read once from the environment and passed down by reference.
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MigrateError, MigrateResult};
use crate::normalization::avatar::NormalizeLimits;
use crate::pipeline::retry::RetryPolicy;
use crate::util::env::{env_list, env_opt, env_parse, env_req};

/// Credentials and endpoints of one backend (source or destination).
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    pub project_url: String,
    pub api_key: String,
    /// Optional direct Postgres DSN; when set, tables bypass the REST API.
    pub db_url: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("project_url", &self.project_url)
            .field("api_key", &"***")
            .field("db_url", &self.db_url.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: BackendConfig,
    pub destination: BackendConfig,
    pub batch_size: usize,
    pub lookup_chunk: usize,
    pub country_filter: String,
    pub download_dir: PathBuf,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub avatar: NormalizeLimits,
}

pub const REQUIRED_ENV: &[&str] = &[
    "OLD_SUPABASE_URL",
    "OLD_SUPABASE_KEY",
    "NEW_SUPABASE_URL",
    "NEW_SUPABASE_KEY",
];

pub const LOGGED_ENV: &[&str] = &[
    "OLD_DB_URL",
    "NEW_DB_URL",
    "COUNTRY_FILTER",
    "BATCH_SIZE",
    "RETRY_MAX",
    "RETRY_BASE_MS",
    "RETRY_JITTER_MS",
    "LOOKUP_CHUNK",
    "DOWNLOAD_DIR",
    "AVATAR_MAX_BYTES",
    "AVATAR_MAX_DIMENSION",
    "AVATAR_ALLOWED_MIME",
];

impl MigrationConfig {
    /// Read every setting from the environment (`.env` honoured).
    pub fn from_env() -> anyhow::Result<Self> {
        let source = BackendConfig {
            project_url: env_req("OLD_SUPABASE_URL")?,
            api_key: env_req("OLD_SUPABASE_KEY")?,
            db_url: env_opt("OLD_DB_URL"),
        };
        let destination = BackendConfig {
            project_url: env_req("NEW_SUPABASE_URL")?,
            api_key: env_req("NEW_SUPABASE_KEY")?,
            db_url: env_opt("NEW_DB_URL"),
        };

        let lookup_default = env_parse("STAGED_LOOKUP_CHUNK", 200usize);
        let defaults = NormalizeLimits::default();
        let cfg = Self {
            source,
            destination,
            batch_size: env_parse("BATCH_SIZE", 200usize),
            lookup_chunk: env_parse("LOOKUP_CHUNK", lookup_default),
            country_filter: env_opt("COUNTRY_FILTER").unwrap_or_else(|| "LK".into()),
            download_dir: PathBuf::from(env_opt("DOWNLOAD_DIR").unwrap_or_else(|| "tmp".into())),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 60u64)),
            retry: RetryPolicy {
                max_attempts: env_parse("RETRY_MAX", 5u32),
                base_delay: Duration::from_millis(env_parse("RETRY_BASE_MS", 500u64)),
                jitter_max: Duration::from_millis(env_parse("RETRY_JITTER_MS", 100u64)),
            },
            avatar: NormalizeLimits {
                max_bytes: env_parse("AVATAR_MAX_BYTES", defaults.max_bytes),
                max_dimension: env_parse("AVATAR_MAX_DIMENSION", defaults.max_dimension),
                allowed_mime: env_list(
                    "AVATAR_ALLOWED_MIME",
                    &["image/jpeg", "image/png", "image/webp"],
                ),
                start_quality: env_parse("AVATAR_START_QUALITY", defaults.start_quality),
                floor_quality: env_parse("AVATAR_MIN_QUALITY", defaults.floor_quality),
                quality_step: env_parse("AVATAR_QUALITY_STEP", defaults.quality_step),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MigrateResult<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::Config("BATCH_SIZE must be positive".into()));
        }
        if self.lookup_chunk == 0 {
            return Err(MigrateError::Config("LOOKUP_CHUNK must be positive".into()));
        }
        for (name, backend) in [("source", &self.source), ("destination", &self.destination)] {
            if url::Url::parse(&backend.project_url).is_err() {
                return Err(MigrateError::Config(format!(
                    "{name} project URL is not an absolute URL"
                )));
            }
        }
        self.avatar.validate()
    }
}

#[cfg(test)]
pub(crate) fn test_config(download_dir: PathBuf) -> MigrationConfig {
    MigrationConfig {
        source: BackendConfig {
            project_url: "https://old.example.co".into(),
            api_key: "old-key".into(),
            db_url: None,
        },
        destination: BackendConfig {
            project_url: "https://new.example.co".into(),
            api_key: "new-key".into(),
            db_url: None,
        },
        batch_size: 200,
        lookup_chunk: 200,
        country_filter: "LK".into(),
        download_dir,
        http_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            jitter_max: Duration::ZERO,
        },
        avatar: NormalizeLimits::default(),
    }
}
