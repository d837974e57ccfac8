//! Chunked media transfers: resumable upload and ranged download.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use drivelink_auth::Session;
use drivelink_common::{Error, Result};
use drivelink_transfer::{ChunkStatus, ChunkedTransfer};

use super::client::DriveFile;
use crate::http::{error_from_response, send};

/// Consecutive 308 replies without new committed bytes before giving up.
pub const MAX_STALLED_CHUNKS: u32 = 5;

/// Offset following the last byte the server committed, from a 308
/// `Range: bytes=0-N` header. No header means nothing was committed.
pub(crate) fn committed_offset(range: Option<&str>) -> Result<u64> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, last)| last.parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| Error::Transfer(format!("Malformed Range header: {}", range)))
}

/// Total size from `Content-Range: bytes a-b/total` (or `bytes */total`).
/// `None` when the server reports the total as unknown.
pub(crate) fn content_range_total(content_range: &str) -> Option<u64> {
    content_range
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}

/// Resumable upload of a local file.
///
/// Each chunk is a `PUT` of `Content-Range: bytes a-b/total` to the session
/// URI. 308 asks for more and says how much was committed; the reader is
/// realigned to that offset, so a partially accepted chunk is resent from
/// where the server stopped.
pub struct ResumableUpload {
    http: Client,
    session_uri: String,
    file: File,
    total: u64,
    offset: u64,
    chunk_size: usize,
    name: String,
    uploaded: Option<DriveFile>,
    stalled: u32,
}

impl ResumableUpload {
    pub fn new(
        http: Client,
        session_uri: String,
        file: File,
        total: u64,
        chunk_size: usize,
        name: &str,
    ) -> Self {
        Self {
            http,
            session_uri,
            file,
            total,
            offset: 0,
            chunk_size,
            name: name.to_string(),
            uploaded: None,
            stalled: 0,
        }
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let remaining = self.total.saturating_sub(self.offset);
        let len = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];

        self.file.seek(SeekFrom::Start(self.offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait]
impl ChunkedTransfer for ResumableUpload {
    type Output = DriveFile;

    fn describe(&self) -> String {
        format!("upload of {}", self.name)
    }

    async fn next_chunk(&mut self) -> Result<ChunkStatus> {
        let operation = format!("upload chunk of {} at {}", self.name, self.offset);

        let request = if self.total == 0 {
            self.http
                .put(&self.session_uri)
                .header(header::CONTENT_RANGE, "bytes */0")
                .header(header::CONTENT_LENGTH, "0")
        } else {
            let data = self.read_chunk().await?;
            let end = self.offset + data.len() as u64 - 1;
            self.http
                .put(&self.session_uri)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", self.offset, end, self.total),
                )
                .header(header::CONTENT_LENGTH, data.len().to_string())
                .body(data)
        };

        let response = send(request, &operation).await?;
        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let file: DriveFile = response.json().await.map_err(|e| {
                Error::Serialization(format!("{}: invalid response body: {}", operation, e))
            })?;
            self.offset = self.total;
            self.uploaded = Some(file);
            return Ok(ChunkStatus {
                bytes_transferred: self.total,
                bytes_total: Some(self.total),
                done: true,
            });
        }

        if status == StatusCode::PERMANENT_REDIRECT {
            let range = response
                .headers()
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok());
            let committed = committed_offset(range)?;
            if committed > self.offset {
                self.stalled = 0;
            } else {
                self.stalled += 1;
                if self.stalled >= MAX_STALLED_CHUNKS {
                    return Err(Error::Transfer(format!(
                        "{}: server committed nothing in {} consecutive chunks",
                        operation, self.stalled
                    )));
                }
            }
            self.offset = committed;
            debug!("{}: server committed {} bytes", operation, self.offset);
            return Ok(ChunkStatus {
                bytes_transferred: self.offset,
                bytes_total: Some(self.total),
                done: false,
            });
        }

        Err(error_from_response(&operation, response).await)
    }

    fn into_output(self: Box<Self>) -> Result<DriveFile> {
        let this = *self;
        this.uploaded
            .ok_or_else(|| Error::Transfer(format!("upload of {} did not complete", this.name)))
    }
}

/// Download in `Range` requests of `chunk_size` bytes.
///
/// A 206 carries one range and the total in `Content-Range`. A 200 means the
/// server ignored the range and sent the whole body, which completes the
/// transfer.
pub struct RangedDownload {
    http: Client,
    session: Arc<Session>,
    url: String,
    file_id: String,
    chunk_size: usize,
    received: Vec<u8>,
    total: Option<u64>,
}

impl RangedDownload {
    pub fn new(
        http: Client,
        session: Arc<Session>,
        url: String,
        file_id: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            http,
            session,
            url,
            file_id: file_id.to_string(),
            chunk_size,
            received: Vec::new(),
            total: None,
        }
    }
}

#[async_trait]
impl ChunkedTransfer for RangedDownload {
    type Output = Vec<u8>;

    fn describe(&self) -> String {
        format!("download of {}", self.file_id)
    }

    async fn next_chunk(&mut self) -> Result<ChunkStatus> {
        let start = self.received.len() as u64;
        let end = start + self.chunk_size as u64 - 1;
        let operation = format!("download {} bytes {}-{}", self.file_id, start, end);

        let request = self
            .http
            .get(&self.url)
            .query(&[("alt", "media")])
            .header(header::AUTHORIZATION, self.session.bearer().await?)
            .header(header::RANGE, format!("bytes={}-{}", start, end));
        let response = send(request, &operation).await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Network(format!("{}: {}", operation, e)))?;
                self.received = body.to_vec();
                let total = self.received.len() as u64;
                self.total = Some(total);
                Ok(ChunkStatus {
                    bytes_transferred: total,
                    bytes_total: Some(total),
                    done: true,
                })
            }
            StatusCode::PARTIAL_CONTENT => {
                let total = response
                    .headers()
                    .get(header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total);
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Network(format!("{}: {}", operation, e)))?;
                if body.is_empty() {
                    return Err(Error::Transfer(format!("{}: empty partial response", operation)));
                }

                self.received.extend_from_slice(&body);
                self.total = total.or(self.total);
                let sent = self.received.len() as u64;
                let done = match self.total {
                    Some(total) => sent >= total,
                    // Unknown total: a short range is the last one.
                    None => (body.len() as u64) < self.chunk_size as u64,
                };
                Ok(ChunkStatus {
                    bytes_transferred: sent,
                    bytes_total: self.total,
                    done,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let total = response
                    .headers()
                    .get(header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
                    .or(self.total);
                // Byte 0 of an empty file, or a range starting right at the end.
                if start == 0 || total == Some(start) {
                    self.total = Some(start);
                    return Ok(ChunkStatus {
                        bytes_transferred: start,
                        bytes_total: Some(start),
                        done: true,
                    });
                }
                Err(error_from_response(&operation, response).await)
            }
            _ => Err(error_from_response(&operation, response).await),
        }
    }

    fn into_output(self: Box<Self>) -> Result<Vec<u8>> {
        let this = *self;
        Ok(this.received)
    }
}
