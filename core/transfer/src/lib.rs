//! Transfer plumbing shared by the storage clients.
//!
//! - Retry policy with fixed or exponential delays for network calls
//! - Chunked transfer driver with progress reporting and cancellation

pub mod progress;
pub mod retry;

pub use progress::{
    align_chunk_size, chunk_size_from_config, drive, ChunkStatus, ChunkedTransfer,
    CompletedTransfer, TransferState, CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE,
};
pub use retry::{Backoff, RetryExecutor, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
