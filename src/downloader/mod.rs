pub mod error;
pub mod manager;
pub mod registry;
pub mod task;

pub use error::RegistryError;
pub use manager::{DownloadManager, JobContext};
pub use registry::JobRegistry;
pub use task::{DownloadJob, JobStatus, ProgressView, RetentionPolicy};
