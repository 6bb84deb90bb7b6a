use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::encoder::{EncodeError, Encoder, Resolution};
use crate::job::{remove_path, schedule_cleanup, Job};
use crate::store::ArtifactStore;

pub const DOWNLOAD_GRACE: Duration = Duration::from_secs(5);
pub const SCRATCH_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_FRAME_INTERVAL: u32 = 15;
/// Frames are always sampled from a 720p rendition of the upload.
pub const EXTRACT_RESOLUTION: Resolution = Resolution::P720;

/// One extracted still, numbered from 1 in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

impl Frame {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub index: usize,
    pub filename: String,
    pub url: Option<String>,
    pub local_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactDescriptor {
    pub fn stored(frame: &Frame, url: String) -> Self {
        ArtifactDescriptor {
            index: frame.index,
            filename: frame.filename(),
            url: Some(url),
            local_path: frame.path.to_string_lossy().into_owned(),
            error: None,
        }
    }

    pub fn failed(frame: &Frame, error: String) -> Self {
        ArtifactDescriptor {
            index: frame.index,
            filename: frame.filename(),
            url: None,
            local_path: frame.path.to_string_lossy().into_owned(),
            error: Some(error),
        }
    }
}

/// Outcome of storing a job's frames, successes and failures each in
/// extraction order.
#[derive(Debug, Default)]
pub struct FrameBatch {
    pub frames: Vec<ArtifactDescriptor>,
    pub failed: Vec<ArtifactDescriptor>,
}

impl FrameBatch {
    pub fn frames_count(&self) -> usize {
        self.frames.len()
    }

    pub fn errors(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|d| format!("{}: {}", d.filename, d.error.as_deref().unwrap_or("unknown error")))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    encoder: Encoder,
    download_grace: Duration,
    scratch_grace: Duration,
}

impl Pipeline {
    pub fn new(encoder: Encoder) -> Self {
        Pipeline {
            encoder,
            download_grace: DOWNLOAD_GRACE,
            scratch_grace: SCRATCH_GRACE,
        }
    }

    pub fn with_grace(mut self, download_grace: Duration, scratch_grace: Duration) -> Self {
        self.download_grace = download_grace;
        self.scratch_grace = scratch_grace;
        self
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Compress the job's input and hand back the output path. Both files are
    /// deleted once the download grace delay has passed.
    pub async fn compress_only(
        &self,
        job: &Job,
        resolution: Resolution,
    ) -> Result<PathBuf, EncodeError> {
        self.compress(job, resolution).await?;
        schedule_cleanup(
            vec![job.input.clone(), job.output.clone()],
            self.download_grace,
        );
        Ok(job.output.clone())
    }

    /// Compress to `resolution`, then sample frames from the compressed output.
    /// On failure every scratch file of the job is removed before returning.
    pub async fn compress_and_extract(
        &self,
        job: &Job,
        resolution: Resolution,
        interval_seconds: u32,
    ) -> Result<Vec<Frame>, EncodeError> {
        self.compress(job, resolution).await?;
        match self.extract(job, interval_seconds).await {
            Ok(frames) => Ok(frames),
            Err(e) => {
                discard(job).await;
                Err(e)
            }
        }
    }

    /// Sample frames from the job's existing compressed output. The output is
    /// left in place whatever the outcome.
    pub async fn extract(&self, job: &Job, interval_seconds: u32) -> Result<Vec<Frame>, EncodeError> {
        let paths = self
            .encoder
            .extract_frames(&job.output, &job.frames_dir, interval_seconds)
            .await?;
        Ok(paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| Frame { index: i + 1, path })
            .collect())
    }

    /// The full ingest workflow: compress to 720p, extract, and store every
    /// frame. Store failures are collected per frame and never abort the batch.
    /// Only the input is deleted, after the scratch grace delay.
    pub async fn extract_and_store<S: ArtifactStore + ?Sized>(
        &self,
        job: &Job,
        interval_seconds: u32,
        store: &S,
    ) -> Result<FrameBatch, EncodeError> {
        let frames = self
            .compress_and_extract(job, EXTRACT_RESOLUTION, interval_seconds)
            .await?;
        let batch = store_frames(store, job, &frames).await;
        schedule_cleanup(vec![job.input.clone()], self.scratch_grace);
        Ok(batch)
    }

    /// Compress and extract for later publishing. Only the input is scheduled
    /// for deletion; the compressed output and frames stay in scratch.
    pub async fn prepare_for_publish(
        &self,
        job: &Job,
        interval_seconds: u32,
    ) -> Result<Vec<Frame>, EncodeError> {
        let frames = self
            .compress_and_extract(job, EXTRACT_RESOLUTION, interval_seconds)
            .await?;
        schedule_cleanup(vec![job.input.clone()], self.download_grace);
        Ok(frames)
    }

    async fn compress(&self, job: &Job, resolution: Resolution) -> Result<(), EncodeError> {
        if let Err(e) = self
            .encoder
            .compress(&job.input, &job.output, resolution)
            .await
        {
            discard(job).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Put every frame in `store`, keeping successes and failures apart.
pub async fn store_frames<S: ArtifactStore + ?Sized>(
    store: &S,
    job: &Job,
    frames: &[Frame],
) -> FrameBatch {
    let mut batch = FrameBatch::default();
    for frame in frames {
        let key = store.frame_key(job.id, &frame.filename());
        match store.put(&frame.path, &key).await {
            Ok(url) => batch.frames.push(ArtifactDescriptor::stored(frame, url)),
            Err(e) => {
                warn!("Could not store {}: {}", frame.filename(), e);
                batch.failed.push(ArtifactDescriptor::failed(frame, e.to_string()));
            }
        }
    }
    info!(
        "Stored {}/{} frames of job {} in {} store",
        batch.frames.len(),
        frames.len(),
        job.id,
        store.kind().as_str()
    );
    batch
}

async fn discard(job: &Job) {
    remove_path(&job.output).await;
    remove_path(&job.frames_dir).await;
    for input in job.input_candidates() {
        remove_path(&input).await;
    }
    remove_path(&job.input).await;
}
