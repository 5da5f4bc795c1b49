//! Reusable building blocks of a migration job.
pub mod dedup;
pub mod job;
pub mod lookup;
pub mod mapping;
pub mod retry;
pub mod scanner;
pub mod transfer;
pub mod upsert;
