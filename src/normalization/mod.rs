pub mod avatar;

pub use avatar::{normalize, NormalizeLimits, Normalized};
