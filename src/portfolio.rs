use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::job::{is_plain_filename, schedule_cleanup, secure_filename, Job};
use crate::store::StoreError;
use crate::supabase::{content_type_for, CatalogError, Order, RestClient, SupabaseStorage, TableQuery};

pub const PUBLISH_CLEANUP_DELAY: Duration = Duration::from_secs(5);
const SAFE_TITLE_MAX: usize = 50;
const FRAME_ROUTE: &str = "/admin/frame/";

/// Catalog sections, each stored under its own bucket folder.
#[derive(
    strum::EnumString, strum::IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq,
)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Ekspertnye,
    Hr,
    Ohvatnye,
    Reklamnye,
    Sfery,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Category::Ekspertnye => "Expertniye",
            Category::Hr => "HR-video",
            Category::Ohvatnye => "Ohvatnye",
            Category::Reklamnye => "Reklamniye",
            Category::Sfery => "Sfery",
        }
    }
}

/// Display aspect of a catalog entry.
#[derive(
    strum::EnumString, strum::IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum PortfolioFormat {
    #[default]
    #[strum(serialize = "9-16")]
    Portrait,
    #[strum(serialize = "16-9")]
    Landscape,
    #[strum(serialize = "1-1")]
    Square,
}

impl PortfolioFormat {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            PortfolioFormat::Portrait => (238, 368),
            PortfolioFormat::Landscape => (640, 360),
            PortfolioFormat::Square => (400, 400),
        }
    }
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("{0}")]
    NotFound(String),
    #[error("upload of {what} failed: {source}")]
    Upload {
        what: &'static str,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("catalog insert returned no row")]
    EmptyInsert,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub category: Category,
    pub frame_path: String,
    pub title: String,
    pub description: String,
    pub format: PortfolioFormat,
}

#[derive(Debug, Serialize)]
struct PortfolioRow<'a> {
    title: &'a str,
    description: &'a str,
    video_url: String,
    image_url: String,
    category: &'static str,
    width: u32,
    height: u32,
    format: &'static str,
    order_index: i64,
    is_published: bool,
}

/// Title reduced to a storage-safe file stem, or the job token when nothing survives.
pub fn safe_title(title: &str, job_id: Uuid) -> String {
    let safe: String = secure_filename(title).chars().take(SAFE_TITLE_MAX).collect();
    if safe.is_empty() {
        job_id.to_string()
    } else {
        safe
    }
}

/// Finds the cover frame on disk. `frame_path` is either an `/admin/frame/<job>/<file>`
/// URL, absolute or relative, or a path inside the scratch directory.
pub async fn resolve_cover(scratch_dir: &Path, frame_path: &str) -> Option<PathBuf> {
    let candidate = if let Some((_, rest)) = frame_path.split_once(FRAME_ROUTE) {
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let (job, file) = rest.split_once('/')?;
        let job = Uuid::parse_str(job).ok()?;
        if !is_plain_filename(file) {
            return None;
        }
        scratch_dir.join(format!("{}_frames", job)).join(file)
    } else {
        PathBuf::from(frame_path)
    };

    let scratch = tokio::fs::canonicalize(scratch_dir).await.ok()?;
    let resolved = tokio::fs::canonicalize(&candidate).await.ok()?;
    if resolved.starts_with(&scratch) && resolved.is_file() {
        Some(resolved)
    } else {
        warn!("Rejected cover frame outside scratch: {:?}", frame_path);
        None
    }
}

pub struct Portfolio {
    storage: SupabaseStorage,
    rest: RestClient,
    table: String,
    cleanup_delay: Duration,
}

impl Portfolio {
    pub fn new(storage: SupabaseStorage, rest: RestClient, table: &str) -> Self {
        Portfolio {
            storage,
            rest,
            table: table.to_string(),
            cleanup_delay: PUBLISH_CLEANUP_DELAY,
        }
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Highest `order_index` in the category plus one; 0 when the lookup fails.
    pub async fn next_order_index(&self, category: Category) -> i64 {
        let query = TableQuery {
            table: self.table.clone(),
            columns: vec!["order_index".to_string()],
            filter: Some(("category".to_string(), category.as_str().to_string())),
            order: Some(Order {
                column: "order_index".to_string(),
                descending: true,
            }),
            limit: Some(1),
        };
        match self.rest.select(&query).await {
            Ok(rows) => {
                let max = rows
                    .first()
                    .and_then(|row| row.get("order_index"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                max + 1
            }
            Err(e) => {
                warn!("Could not read order_index for {}: {}", category.as_str(), e);
                0
            }
        }
    }

    async fn upload(&self, local: &Path, key: &str, what: &'static str) -> Result<String, PortfolioError> {
        let data = tokio::fs::read(local).await.map_err(|source| PortfolioError::Upload {
            what,
            source: StoreError::LocalIoFailure {
                path: local.to_path_buf(),
                source,
            },
        })?;
        self.storage
            .upload(data, key, content_type_for(local))
            .await
            .map_err(|source| PortfolioError::Upload { what, source })?;
        Ok(self.storage.public_path(key))
    }

    /// Uploads the job's compressed video and the chosen cover, records a
    /// catalog row and returns it as stored.
    pub async fn publish(&self, job: &Job, request: &PublishRequest) -> Result<Value, PortfolioError> {
        if !tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
            return Err(PortfolioError::NotFound(
                "compressed video not found".to_string(),
            ));
        }
        let cover = resolve_cover(&job.scratch_dir, &request.frame_path)
            .await
            .ok_or_else(|| PortfolioError::NotFound("cover frame not found".to_string()))?;

        let folder = request.category.folder();
        let safe = safe_title(&request.title, job.id);
        let video_key = format!("{}/compressed_720p_{}.mp4", folder, safe);
        let image_key = format!("images/{}/{}.jpg", folder, safe);

        let video_url = self.upload(&job.output, &video_key, "video").await?;
        let image_url = self.upload(&cover, &image_key, "cover").await?;

        let (width, height) = request.format.size();
        let row = PortfolioRow {
            title: &request.title,
            description: &request.description,
            video_url,
            image_url,
            category: request.category.as_str(),
            width,
            height,
            format: request.format.as_str(),
            order_index: self.next_order_index(request.category).await,
            is_published: true,
        };
        let inserted = self
            .rest
            .insert(&self.table, &row)
            .await?
            .into_iter()
            .next()
            .ok_or(PortfolioError::EmptyInsert)?;
        info!(
            "Published job {} to {} as '{}'",
            job.id,
            request.category.as_str(),
            request.title
        );

        let mut leftovers = vec![job.output.clone(), job.frames_dir.clone()];
        leftovers.extend(job.input_candidates());
        schedule_cleanup(leftovers, self.cleanup_delay);
        Ok(inserted)
    }
}
