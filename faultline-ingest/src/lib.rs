pub mod azure;
pub mod clean;
pub mod error;

pub use azure::AzureDevOpsClient;
pub use clean::{clean_log, clean_log_line};
pub use error::IngestError;
