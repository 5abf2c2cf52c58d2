//! External decoder process pipeline.
//!
//! Segment bytes are written to the decoder's stdin by a feeder task. The
//! decoder output is read either from its stdout as it is produced, or from a
//! file it writes inside a private scratch directory once it has exited.

use std::{
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{ready, Stream, StreamExt};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{ByteStream, StreamHandle};
use crate::error::{Result, TidalError};
use crate::models::AudioQuality;

/// Placeholder replaced by the output file path in decoder arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Bytes of decoder stderr kept for error reports.
const STDERR_TAIL: usize = 4096;

/// Where the decoder writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutput {
    /// Streamed from the process stdout.
    Stdout,
    /// Written to `file_name` inside a scratch directory.
    File { file_name: String },
}

/// Decoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSpec {
    pub program: String,
    pub args: Vec<String>,
    pub output: TranscodeOutput,
    /// MIME type of the produced stream.
    pub mime_type: String,
}

impl TranscodeSpec {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        output: TranscodeOutput,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            output,
            mime_type: mime_type.into(),
        }
    }

    /// ffmpeg remux of FLAC segments to a FLAC stream on stdout.
    pub fn flac_stdout(program: impl Into<String>) -> Self {
        Self::new(
            program,
            ffmpeg_args(&["-f", "flac", "-"]),
            TranscodeOutput::Stdout,
            "audio/flac",
        )
    }

    /// ffmpeg remux of AAC segments to an `.m4a` file.
    ///
    /// MP4 needs a seekable output, so it cannot go to a pipe.
    pub fn m4a_file(program: impl Into<String>) -> Self {
        Self::new(
            program,
            ffmpeg_args(&["-y", OUTPUT_PLACEHOLDER]),
            TranscodeOutput::File {
                file_name: "data.m4a".to_string(),
            },
            "audio/mp4",
        )
    }

    /// Remux matching the delivered quality.
    pub fn for_quality(program: impl Into<String>, quality: AudioQuality) -> Self {
        if quality.is_lossless() {
            Self::flac_stdout(program)
        } else {
            Self::m4a_file(program)
        }
    }

    fn resolved_args(&self, output: Option<&Path>) -> Vec<String> {
        match output {
            Some(path) => {
                let path = path.to_string_lossy();
                self.args
                    .iter()
                    .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &path))
                    .collect()
            }
            None => self.args.clone(),
        }
    }
}

fn ffmpeg_args(tail: &[&str]) -> Vec<String> {
    ["-hide_banner", "-loglevel", "error", "-i", "-", "-c:a", "copy"]
        .iter()
        .chain(tail)
        .map(|s| s.to_string())
        .collect()
}

/// Join handle that aborts its task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(&mut self, role: &str) -> Result<T> {
        (&mut self.0)
            .await
            .map_err(|e| TidalError::TranscodeFailed(format!("{} task failed: {}", role, e)))
    }

    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A running decoder with its feeder and stderr collector.
struct Pipeline {
    program: String,
    child: Child,
    feeder: Option<AbortOnDrop<Result<()>>>,
    stderr: Option<AbortOnDrop<String>>,
    wait: Duration,
}

impl Pipeline {
    /// Waits until every segment has been written (or feeding failed).
    async fn fed(&mut self) -> Result<()> {
        match self.feeder.take() {
            Some(mut task) => task.join("feeder").await?,
            None => Ok(()),
        }
    }

    /// Kills the process, waiting at most `wait` for it to exit.
    async fn kill(&mut self) {
        self.feeder = None;
        if let Err(e) = self.child.start_kill() {
            debug!("Decoder already gone: {}", e);
        }
        if timeout(self.wait, self.child.wait()).await.is_err() {
            warn!("{} did not exit within {:?} after kill", self.program, self.wait);
        }
    }

    async fn diagnostics(&mut self) -> String {
        match self.stderr.take() {
            Some(mut task) => match timeout(self.wait, task.join("stderr")).await {
                Ok(Ok(text)) => text,
                _ => String::new(),
            },
            None => String::new(),
        }
    }

    /// Waits for the process to exit and reports the pipeline outcome.
    ///
    /// A segment failure wins over the decoder status; a non-zero exit
    /// becomes `TranscodeFailed` with the captured stderr.
    async fn finish(&mut self) -> Result<()> {
        let status = match timeout(self.wait, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.kill().await;
                return Err(TidalError::TranscodeFailed(format!(
                    "{} did not exit within {:?}",
                    self.program, self.wait
                )));
            }
        };

        if status.success() {
            debug!("{} exited successfully", self.program);
            return self.fed().await;
        }

        let finished = self
            .feeder
            .as_ref()
            .map(AbortOnDrop::is_finished)
            .unwrap_or(false);
        let feed_result = if finished { Some(self.fed().await) } else { None };
        if let Some(Err(e @ TidalError::SegmentFetchFailed { .. })) = feed_result {
            return Err(e);
        }
        self.feeder = None;

        let diagnostics = self.diagnostics().await;
        warn!("{} failed ({}): {}", self.program, status, diagnostics);
        Err(TidalError::TranscodeFailed(format!(
            "{} exited with {}: {}",
            self.program, status, diagnostics
        )))
    }
}

/// Spawns the decoder, feeds it `segments` and returns its output stream.
pub(crate) async fn transcode(
    segments: ByteStream,
    spec: &TranscodeSpec,
    scratch_root: &Path,
    wait: Duration,
) -> Result<StreamHandle> {
    let scratch = match &spec.output {
        TranscodeOutput::File { .. } => {
            tokio::fs::create_dir_all(scratch_root).await?;
            Some(
                tempfile::Builder::new()
                    .prefix("pmotidal-")
                    .tempdir_in(scratch_root)?,
            )
        }
        TranscodeOutput::Stdout => None,
    };

    let output_path: Option<PathBuf> = match (&spec.output, &scratch) {
        (TranscodeOutput::File { file_name }, Some(dir)) => Some(dir.path().join(file_name)),
        _ => None,
    };

    let args = spec.resolved_args(output_path.as_deref());
    debug!("Spawning {} {:?}", spec.program, args);

    let mut child = Command::new(&spec.program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(if output_path.is_some() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TidalError::TranscodeFailed(format!("failed to start {}: {}", spec.program, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TidalError::TranscodeFailed("decoder stdin unavailable".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TidalError::TranscodeFailed("decoder stderr unavailable".into()))?;
    let stdout = child.stdout.take();

    let mut pipeline = Pipeline {
        program: spec.program.clone(),
        child,
        feeder: Some(AbortOnDrop(tokio::spawn(feed(segments, stdin)))),
        stderr: Some(AbortOnDrop(tokio::spawn(collect_stderr(stderr)))),
        wait,
    };

    match (output_path, scratch, stdout) {
        (Some(path), Some(scratch), _) => {
            match pipeline.fed().await {
                Err(e @ TidalError::SegmentFetchFailed { .. }) => {
                    pipeline.kill().await;
                    return Err(e);
                }
                fed => {
                    pipeline.finish().await?;
                    fed?;
                }
            }

            let file = tokio::fs::File::open(&path).await?;
            debug!("Decoder output ready at {}", path.display());

            Ok(StreamHandle {
                mime_type: spec.mime_type.clone(),
                size_bytes: None,
                stream: Box::pin(ScratchStream::new(
                    ReaderStream::new(file).map(|r| r.map_err(TidalError::from)),
                    scratch,
                )),
            })
        }
        (None, _, Some(stdout)) => Ok(StreamHandle {
            mime_type: spec.mime_type.clone(),
            size_bytes: None,
            stream: Box::pin(stdout_stream(stdout, pipeline)),
        }),
        _ => {
            pipeline.kill().await;
            Err(TidalError::TranscodeFailed("decoder output unavailable".into()))
        }
    }
}

async fn feed(mut segments: ByteStream, mut stdin: ChildStdin) -> Result<()> {
    let mut written = 0u64;
    while let Some(chunk) = segments.next().await {
        let chunk = chunk?;
        stdin.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    // Closing stdin signals end of input
    drop(stdin);
    debug!("Fed {} bytes to decoder", written);
    Ok(())
}

async fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

enum StdoutState {
    Running {
        stdout: ReaderStream<ChildStdout>,
        pipeline: Pipeline,
    },
    Done,
}

fn stdout_stream(stdout: ChildStdout, pipeline: Pipeline) -> impl Stream<Item = Result<Bytes>> + Send {
    let state = StdoutState::Running {
        stdout: ReaderStream::new(stdout),
        pipeline,
    };

    futures::stream::unfold(state, |state| async move {
        let StdoutState::Running {
            mut stdout,
            mut pipeline,
        } = state
        else {
            return None;
        };

        match stdout.next().await {
            Some(Ok(bytes)) => Some((Ok(bytes), StdoutState::Running { stdout, pipeline })),
            Some(Err(e)) => {
                pipeline.kill().await;
                Some((Err(TidalError::Io(e)), StdoutState::Done))
            }
            None => match pipeline.finish().await {
                Ok(()) => None,
                Err(e) => Some((Err(e), StdoutState::Done)),
            },
        }
    })
}

/// File stream that removes its scratch directory at end of stream, on
/// error, or when dropped.
struct ScratchStream<S> {
    inner: S,
    scratch: Option<TempDir>,
}

impl<S> ScratchStream<S> {
    fn new(inner: S, scratch: TempDir) -> Self {
        Self {
            inner,
            scratch: Some(scratch),
        }
    }

    fn release(&mut self) {
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed scratch directory {}", path.display()),
                Err(e) => warn!("Failed to remove scratch directory {}: {}", path.display(), e),
            }
        }
    }
}

impl<S> Stream for ScratchStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.scratch.is_none() {
            return Poll::Ready(None);
        }
        let item = ready!(self.inner.poll_next_unpin(cx));
        if !matches!(item, Some(Ok(_))) {
            self.release();
        }
        Poll::Ready(item)
    }
}

impl<S> Drop for ScratchStream<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args() {
        let flac = TranscodeSpec::for_quality("ffmpeg", AudioQuality::HiResLossless);
        assert_eq!(flac.output, TranscodeOutput::Stdout);
        assert_eq!(flac.mime_type, "audio/flac");
        assert_eq!(
            flac.args.join(" "),
            "-hide_banner -loglevel error -i - -c:a copy -f flac -"
        );

        let m4a = TranscodeSpec::for_quality("ffmpeg", AudioQuality::High);
        assert_eq!(m4a.mime_type, "audio/mp4");
        let args = m4a.resolved_args(Some(Path::new("/tmp/x/data.m4a")));
        assert_eq!(
            args.join(" "),
            "-hide_banner -loglevel error -i - -c:a copy -y /tmp/x/data.m4a"
        );
    }

    #[tokio::test]
    async fn test_scratch_stream_removes_directory_at_end() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir_in(root.path()).unwrap();
        let path = scratch.path().to_path_buf();

        let inner = futures::stream::iter(vec![Ok::<_, TidalError>(Bytes::from_static(b"abc"))]);
        let mut stream = ScratchStream::new(inner, scratch);

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(path.exists());
        assert!(stream.next().await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_stream_removes_directory_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().to_path_buf();

        let inner = futures::stream::iter(vec![Ok::<_, TidalError>(Bytes::from_static(b"abc"))]);
        drop(ScratchStream::new(inner, scratch));
        assert!(!path.exists());
    }
}
