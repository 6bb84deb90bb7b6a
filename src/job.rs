use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv"];
const DEFAULT_INPUT_EXTENSION: &str = "mp4";

/// Scratch files of one request. Every path carries the job id, so concurrent
/// jobs sharing the scratch directory never touch each other's files.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub scratch_dir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub frames_dir: PathBuf,
}

impl Job {
    /// `output_tag` distinguishes workflows, e.g. `output` or `output_720p`.
    pub fn new(scratch_dir: &Path, id: Uuid, input_extension: &str, output_tag: &str) -> Self {
        let extension = if input_extension.is_empty() {
            DEFAULT_INPUT_EXTENSION
        } else {
            input_extension
        };
        Job {
            id,
            scratch_dir: scratch_dir.to_path_buf(),
            input: scratch_dir.join(format!("{}_input.{}", id, extension)),
            output: scratch_dir.join(format!("{}_{}.mp4", id, output_tag)),
            frames_dir: scratch_dir.join(format!("{}_frames", id)),
        }
    }

    /// Reattach to the scratch files of an earlier request. The input keeps
    /// whatever extension it was saved with, if it still exists.
    pub fn resume(scratch_dir: &Path, id: Uuid, output_tag: &str) -> Self {
        let mut job = Job::new(scratch_dir, id, DEFAULT_INPUT_EXTENSION, output_tag);
        if let Some(input) = job.input_candidates().into_iter().next() {
            job.input = input;
        }
        job
    }

    pub fn input_candidates(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/{}_input.*",
            glob::Pattern::escape(&self.scratch_dir.to_string_lossy()),
            self.id
        );
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn frame_path(&self, filename: &str) -> PathBuf {
        self.frames_dir.join(filename)
    }
}

pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

pub fn is_allowed_video(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// ASCII-only file name: whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped, leading and trailing `.`/`_` are trimmed.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// A single path segment that cannot escape its directory.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.')
}

pub async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        debug!("Could not remove scratch path {:?}: {}", path, e);
    }
}

/// Deletes `paths` once `delay` has elapsed. Fire-and-forget: nobody has to
/// await the handle and failures are only logged.
pub fn schedule_cleanup(paths: Vec<PathBuf>, delay: Duration) -> JoinHandle<()> {
    let deadline = Instant::now() + delay;
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        for path in &paths {
            remove_path(path).await;
        }
        debug!("Cleaned up {} scratch paths", paths.len());
    })
}
