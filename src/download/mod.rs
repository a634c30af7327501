//! Network side of the pipeline: chunked stream download, retry policy and
//! URL liveness checks.

mod chunked;
mod liveness;
mod retry;

pub use chunked::{
    ChunkedDownloader, DEFAULT_CHUNK_SIZE, DEFAULT_STREAM_BUFFER, DownloadConfig, OpenOptions,
};
pub use liveness::{LivenessConfig, LivenessGuard};
pub use retry::{DEFAULT_RETRY_STATUSES, RetryConfig};
