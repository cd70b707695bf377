pub mod types;
pub mod classification;

pub use types::OrchestraError;
pub use classification::{ErrorClassification, RetryDisposition};
