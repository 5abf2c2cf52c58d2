//! Stream assembly.
//!
//! Turns a delivery decision into a [`StreamHandle`]:
//!
//! - direct delivery opens one HTTP stream and forwards it untouched;
//! - segmented delivery fetches the [`SegmentPlan`] in order, with a bounded
//!   number of segments in flight, and either forwards the concatenated bytes
//!   or pipes them through an external decoder (see [`transcode`]).
//!
//! Dropping a returned stream cancels in-flight fetches, kills the decoder and
//! removes any scratch directory.

pub mod transcode;

use std::{
    fmt,
    path::{Path, PathBuf},
    pin::Pin,
    time::Duration,
};

use bytes::Bytes;
use futures::{future, stream, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::{Result, TidalError};
use crate::manifest::{Segment, SegmentPlan};
pub use transcode::{TranscodeOutput, TranscodeSpec, OUTPUT_PLACEHOLDER};

/// Boxed stream of audio bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Default number of segments fetched ahead of the one being forwarded.
pub const DEFAULT_SEGMENT_PREFETCH: usize = 2;

/// Default bound on waiting for the decoder to exit.
pub const DEFAULT_PROCESS_WAIT: Duration = Duration::from_secs(30);

/// Audio stream returned to the caller.
pub struct StreamHandle {
    pub mime_type: String,
    /// Only known for direct delivery when the origin sends a content length.
    pub size_bytes: Option<u64>,
    pub stream: ByteStream,
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Adapts the stream to `AsyncRead`.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.stream.map_err(std::io::Error::other))
    }

    /// Copies the whole stream into `writer`, returning the byte count.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut total = 0u64;
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(total)
    }

    /// Reads the whole stream into memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out).await?;
        Ok(out)
    }
}

/// What to do with the concatenated segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Forward the segment bytes as they are.
    Passthrough,
    /// Pipe them through an external decoder.
    Transcode(TranscodeSpec),
}

/// Fetches direct and segmented deliveries.
#[derive(Debug, Clone)]
pub struct StreamAssembler {
    http: Client,
    prefetch: usize,
    scratch_root: PathBuf,
    process_wait: Duration,
}

impl StreamAssembler {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            prefetch: DEFAULT_SEGMENT_PREFETCH,
            scratch_root: std::env::temp_dir(),
            process_wait: DEFAULT_PROCESS_WAIT,
        }
    }

    /// Segments fetched concurrently (at least one).
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Directory under which per-stream scratch directories are created.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_process_wait(mut self, wait: Duration) -> Self {
        self.process_wait = wait;
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Opens a single-file delivery.
    ///
    /// `mime_type` is the type declared by the manifest; the response
    /// `Content-Type` is used when it is absent.
    pub async fn open_direct(&self, url: &str, mime_type: Option<&str>) -> Result<StreamHandle> {
        debug!("Opening direct stream {}", url);
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Direct stream request failed ({}): {}", status, body);
            return Err(TidalError::from_status_code(status.as_u16(), body));
        }

        let mime_type = mime_type
            .map(str::to_string)
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(StreamHandle {
            mime_type,
            size_bytes: response.content_length(),
            stream: Box::pin(response.bytes_stream().map_err(TidalError::from)),
        })
    }

    /// Assembles a segmented delivery.
    ///
    /// # Errors
    ///
    /// * `TidalError::SegmentFetchFailed` - a segment could not be fetched;
    ///   carries the segment index
    /// * `TidalError::TranscodeFailed` - the decoder could not start or
    ///   exited with an error
    pub async fn assemble(&self, plan: SegmentPlan, mode: OutputMode) -> Result<StreamHandle> {
        debug!(
            "Assembling {} segments ({}) with prefetch {}",
            plan.len(),
            plan.mime_type,
            self.prefetch
        );

        let mime_type = plan.mime_type.clone();
        let segments = self.segment_stream(plan);

        match mode {
            OutputMode::Passthrough => Ok(StreamHandle {
                mime_type,
                size_bytes: None,
                stream: segments,
            }),
            OutputMode::Transcode(spec) => {
                transcode::transcode(segments, &spec, &self.scratch_root, self.process_wait).await
            }
        }
    }

    /// Segment bodies in plan order, ending after the first failure.
    fn segment_stream(&self, plan: SegmentPlan) -> ByteStream {
        let http = self.http.clone();
        let fetches = stream::iter(plan.segments)
            .map(move |segment| fetch_segment(http.clone(), segment))
            .buffered(self.prefetch);

        Box::pin(fetches.scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        }))
    }
}

async fn fetch_segment(http: Client, segment: Segment) -> Result<Bytes> {
    let index = segment.index;
    let failed = |reason: String| TidalError::SegmentFetchFailed { index, reason };

    let response = http
        .get(&segment.url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        warn!("Segment {} fetch failed with status {}", index, status);
        return Err(failed(format!("status {}", status.as_u16())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    debug!("Segment {} fetched ({} bytes)", index, bytes.len());
    Ok(bytes)
}
