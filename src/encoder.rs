use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use log::{debug, error, info};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

pub const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(3600);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_PATTERN: &str = "frame_%04d.jpg";
const FRAME_GLOB: &str = "frame_*.jpg";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("FFmpeg not found at '{0}'. Make sure it is installed and available in PATH")]
    ToolNotFound(String),
    #[error("Processing timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("FFmpeg error: {stderr}")]
    EncodeFailed { status: Option<i32>, stderr: String },
    #[error("I/O error while encoding: {0}")]
    Io(#[from] std::io::Error),
}

/// Target resolutions accepted by `compress`, keyed by their nominal height.
#[derive(
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
pub enum Resolution {
    #[strum(serialize = "1080")]
    P1080,
    #[strum(serialize = "720")]
    P720,
    #[strum(serialize = "480")]
    P480,
    #[strum(serialize = "360")]
    P360,
}

impl Resolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::P1080 => (1920, 1080),
            Resolution::P720 => (1280, 720),
            Resolution::P480 => (854, 480),
            Resolution::P360 => (640, 360),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Scale to at most the target width, never above the source width, keeping
    /// the aspect ratio. Both dimensions are truncated to even values, so the
    /// output never exceeds the source in either direction.
    pub fn scale_filter(&self) -> String {
        let (width, _) = self.dimensions();
        format!("scale=trunc(min({}\\,iw)/2)*2:trunc(ow/a/2)*2", width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderStatus {
    Installed,
    NotFound,
}

/// Wraps the external ffmpeg binary. Every invocation runs as a child process
/// bounded by `timeout`; the child is killed when the bound is exceeded.
#[derive(Debug, Clone)]
pub struct Encoder {
    binary: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Duration,
}

impl Encoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Encoder {
            binary: binary.into(),
            leading_args: ["-hide_banner", "-nostdin", "-loglevel", "error"]
                .into_iter()
                .map(OsString::from)
                .collect(),
            timeout: DEFAULT_ENCODE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the arguments placed before every invocation's own arguments.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn compress_args(input: &Path, output: &Path, resolution: Resolution) -> Vec<OsString> {
        let filter = resolution.scale_filter();
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        #[rustfmt::skip]
        args.extend([
            "-vf", filter.as_str(),
            "-c:v", "libx264",
            "-preset", "medium",
            "-crf", "23",
            "-pix_fmt", "yuv420p",
            "-c:a", "aac",
            "-b:a", "128k",
            "-movflags", "+faststart",
        ].map(OsString::from));
        args.push(output.into());
        args
    }

    pub fn extract_args(input: &Path, output_dir: &Path, interval_seconds: u32) -> Vec<OsString> {
        let filter = format!("fps=1/{}", interval_seconds);
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        #[rustfmt::skip]
        args.extend([
            "-vf", filter.as_str(),
            "-q:v", "2",
        ].map(OsString::from));
        args.push(output_dir.join(FRAME_PATTERN).into());
        args
    }

    /// Re-encode `input` to H.264/AAC at `resolution`, overwriting `output`.
    pub async fn compress(
        &self,
        input: &Path,
        output: &Path,
        resolution: Resolution,
    ) -> Result<(), EncodeError> {
        info!(
            "Compressing {:?} -> {:?} at {}p",
            input,
            output,
            resolution.as_str()
        );
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(Self::compress_args(input, output, resolution), self.timeout)
            .await?;
        info!("Compression finished: {:?}", output);
        Ok(())
    }

    /// Sample one JPEG every `interval_seconds` into `output_dir`, returning the
    /// frame paths in temporal order.
    pub async fn extract_frames(
        &self,
        input: &Path,
        output_dir: &Path,
        interval_seconds: u32,
    ) -> Result<Vec<PathBuf>, EncodeError> {
        if interval_seconds == 0 {
            return Err(EncodeError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "frame interval must be positive",
            )));
        }
        info!(
            "Extracting frames from {:?} every {}s into {:?}",
            input, interval_seconds, output_dir
        );
        tokio::fs::create_dir_all(output_dir).await?;
        self.run(
            Self::extract_args(input, output_dir, interval_seconds),
            self.timeout,
        )
        .await?;
        let frames = list_frames(output_dir)?;
        info!("Extracted {} frames into {:?}", frames.len(), output_dir);
        Ok(frames)
    }

    /// Runs `-version` to find out whether the encoder can be executed at all.
    pub async fn probe(&self) -> Result<EncoderStatus, EncodeError> {
        match self.run(vec!["-version".into()], PROBE_TIMEOUT).await {
            Ok(_) => Ok(EncoderStatus::Installed),
            Err(EncodeError::ToolNotFound(_)) | Err(EncodeError::EncodeFailed { .. }) => {
                Ok(EncoderStatus::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<Output, EncodeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Executing encoder command: {:?}", cmd);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                error!("Encoder binary not found: {:?}", self.binary);
                EncodeError::ToolNotFound(self.binary.display().to_string())
            } else {
                EncodeError::Io(e)
            }
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                error!("Encoder exceeded {:?}, killed", timeout);
                return Err(EncodeError::Timeout(timeout));
            }
        };

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Encoder failed with status {}: {}", output.status, stderr);
            Err(EncodeError::EncodeFailed {
                status: output.status.code(),
                stderr,
            })
        }
    }
}

/// Frame files are zero-padded, so lexicographic order is temporal order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, EncodeError> {
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        FRAME_GLOB
    );
    let entries = glob::glob(&pattern).map_err(|e| {
        EncodeError::Io(std::io::Error::new(ErrorKind::InvalidInput, e.to_string()))
    })?;
    let mut frames = entries
        .filter_map(Result::ok)
        .collect::<Vec<PathBuf>>();
    frames.sort();
    Ok(frames)
}
