pub mod backend;
pub mod config;
pub mod error;
pub mod jobs;
pub mod normalization;
pub mod orchestrator;
pub mod pipeline;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
    pub mod storage_url;
}

pub use error::{MigrateError, MigrateResult};
