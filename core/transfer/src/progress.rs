//! Chunked transfer driver.
//!
//! A transfer is anything that moves a payload in sequential segments, each
//! acknowledged before the next one starts. [`drive`] pumps such a transfer
//! to completion, keeps a [`TransferState`] and reports it after every chunk.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use drivelink_common::config::CHUNK_SIZE;
use drivelink_common::{Configuration, Error, Result};

/// Chunk granularity required by resumable upload endpoints.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
/// Default chunk size (8 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_ALIGNMENT;

/// Round a requested chunk size up to the next multiple of 256 KiB.
pub fn align_chunk_size(requested: usize) -> usize {
    let requested = requested.max(1);
    requested.div_ceil(CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT
}

/// Chunk size from `DRIVELINK_CHUNK_SIZE`, aligned, or the default.
pub fn chunk_size_from_config(config: &Configuration) -> Result<usize> {
    Ok(config
        .get_parsed::<usize>(CHUNK_SIZE)?
        .map(align_chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE))
}

/// What a single chunk call reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStatus {
    /// Bytes transferred so far, cumulative.
    pub bytes_transferred: u64,
    /// Payload size, when known.
    pub bytes_total: Option<u64>,
    /// Whether this was the last chunk.
    pub done: bool,
}

/// A chunked upload or download.
#[async_trait]
pub trait ChunkedTransfer: Send {
    /// What a completed transfer yields (created file, downloaded bytes, ...).
    type Output: Send;

    /// Short description used in logs and errors, e.g. `upload of photo.jpg`.
    fn describe(&self) -> String;

    /// Move the next chunk.
    async fn next_chunk(&mut self) -> Result<ChunkStatus>;

    /// Consume the finished transfer. Only called after a chunk reported done.
    fn into_output(self: Box<Self>) -> Result<Self::Output>;
}

/// Progress of a running transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    pub bytes_total: Option<u64>,
    pub bytes_sent: u64,
    pub done: bool,
    /// Number of chunk calls made so far.
    pub chunks: u64,
}

impl TransferState {
    /// Fraction complete in `[0, 1]`, when it can be known.
    pub fn fraction(&self) -> Option<f64> {
        if self.done {
            return Some(1.0);
        }
        match self.bytes_total {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_sent as f64 / total as f64).min(1.0)),
        }
    }

    /// Whole percent for display.
    pub fn percent(&self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0) as u8)
    }

    fn apply(&mut self, status: ChunkStatus, what: &str) -> Result<()> {
        if status.bytes_transferred < self.bytes_sent {
            return Err(Error::Transfer(format!(
                "{}: progress went backwards from {} to {} bytes",
                what, self.bytes_sent, status.bytes_transferred
            )));
        }
        self.chunks += 1;
        self.bytes_sent = status.bytes_transferred;
        if status.bytes_total.is_some() {
            self.bytes_total = status.bytes_total;
        }
        self.done = status.done;
        Ok(())
    }
}

/// Final result of [`drive`].
#[derive(Debug)]
pub struct CompletedTransfer<O> {
    pub output: O,
    pub state: TransferState,
}

/// Drive `transfer` until it reports done.
///
/// `next_chunk` is invoked at least once. `on_progress` sees the state after
/// every chunk. `cancel` is checked between chunks, so a cancelled transfer
/// stops after the in-flight chunk with `Error::Cancelled`.
///
/// # Errors
/// - `Transfer` wrapping transport failures of a chunk call; errors of a
///   more specific kind (remote status, not found, ...) keep their kind
/// - `Transfer` if a chunk reports less progress than the previous one
/// - `Cancelled` if the token fired
pub async fn drive<T, P>(
    mut transfer: Box<T>,
    cancel: &CancellationToken,
    mut on_progress: P,
) -> Result<CompletedTransfer<T::Output>>
where
    T: ChunkedTransfer + ?Sized,
    P: FnMut(&TransferState) + Send,
{
    let what = transfer.describe();
    let mut state = TransferState::default();

    loop {
        let status = transfer.next_chunk().await.map_err(|e| match e {
            Error::Network(_) | Error::Io(_) => Error::Transfer(format!("{} failed: {}", what, e)),
            other => other,
        })?;

        state.apply(status, &what)?;
        on_progress(&state);

        match state.percent() {
            Some(pct) => debug!("{}: {}%", what, pct),
            None => debug!("{}: {} bytes", what, state.bytes_sent),
        }

        if state.done {
            break;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "{} after {} bytes",
                what, state.bytes_sent
            )));
        }
    }

    let output = transfer.into_output()?;
    Ok(CompletedTransfer { output, state })
}
