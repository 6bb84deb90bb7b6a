use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use actix_files::NamedFile;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::{Method, StatusCode};
use actix_web::middleware::DefaultHeaders;
use actix_web::{get, post, web, HttpRequest, HttpResponse, ResponseError};
use anyhow::Context;
use futures_util::StreamExt;
use log::{error, info, warn};
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::Args;
use crate::encoder::{EncodeError, Encoder, Resolution};
use crate::job::{extension_of, is_allowed_video, is_plain_filename, remove_path, secure_filename, Job};
use crate::pipeline::{ArtifactDescriptor, Frame, Pipeline, DEFAULT_FRAME_INTERVAL};
use crate::portfolio::{Category, Portfolio, PortfolioError, PortfolioFormat, PublishRequest};
use crate::store::{create_store, ArtifactStore, Store};
use crate::supabase::{RestClient, SupabaseStorage};

const COMPRESS_TAG: &str = "output";
const PUBLISH_TAG: &str = "output_720p";
const DEFAULT_RESOLUTION: &str = "720";
const MAX_FIELD_BYTES: usize = 64 * 1024;
const KEY_PREVIEW_CHARS: usize = 30;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::Portfolio(PortfolioError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            error!("Request failed: {}", self);
        }
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed upload: {}", e))
    }
}

pub struct AppData {
    pub args: Args,
    pub pipeline: Pipeline,
    pub local_store: Store,
    pub bucket_store: Option<Store>,
    pub portfolio: Option<Portfolio>,
}

/// Makes sure `dir` is a directory, replacing a plain file of the same name.
pub fn prepare_scratch_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() && !dir.is_dir() {
        warn!("{:?} exists as a file, replacing it with a directory", dir);
        std::fs::remove_file(dir)?;
    }
    std::fs::create_dir_all(dir)
}

fn build_portfolio(args: &Args) -> Option<Portfolio> {
    let (url, key) = (args.supabase_url()?, args.supabase_key()?);
    let storage = SupabaseStorage::new(&url, &key, &args.portfolio_bucket);
    let rest = RestClient::new(&url, &key);
    match (storage, rest) {
        (Ok(storage), Ok(rest)) => Some(Portfolio::new(storage, rest, &args.portfolio_table)),
        (Err(e), _) => {
            warn!("Portfolio storage unavailable: {}", e);
            None
        }
        (_, Err(e)) => {
            warn!("Portfolio catalog unavailable: {}", e);
            None
        }
    }
}

impl AppData {
    pub fn from_args(args: Args) -> anyhow::Result<AppData> {
        prepare_scratch_dir(&args.scratch_dir)
            .with_context(|| format!("preparing scratch directory {:?}", args.scratch_dir))?;
        let encoder = Encoder::new(&args.ffmpeg_path).with_timeout(args.encode_timeout());
        let local_store = create_store(&args.local_store_config()).context("creating local store")?;
        let bucket_store = if args.bucket_enabled {
            Some(create_store(&args.bucket_store_config()).context("creating bucket store")?)
        } else {
            None
        };
        let portfolio = build_portfolio(&args);
        Ok(AppData {
            pipeline: Pipeline::new(encoder),
            local_store,
            bucket_store,
            portfolio,
            args,
        })
    }
}

/// Where an incoming video is saved while the form is read.
struct UploadTarget<'a> {
    scratch_dir: &'a Path,
    output_tag: &'a str,
    max_bytes: u64,
}

#[derive(Default)]
struct UploadForm {
    job: Option<Job>,
    filename: Option<String>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// The saved upload, or the 400 explaining why there is none.
    fn require_job(&self) -> Result<(Job, String), ApiError> {
        match (&self.job, &self.filename) {
            (Some(job), Some(name)) => Ok((job.clone(), name.clone())),
            _ => Err(ApiError::BadRequest("No file uploaded".to_string())),
        }
    }

    async fn discard(&self) {
        if let Some(job) = &self.job {
            remove_path(&job.input).await;
        }
    }
}

async fn save_field(field: &mut Field, path: &Path, max_bytes: u64) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::Internal(format!("Could not save upload: {}", e)))?;
    let mut size: u64 = 0;
    while let Some(chunk) = field.next().await {
        let bytes = chunk?;
        size += bytes.len() as u64;
        if size > max_bytes {
            return Err(ApiError::BadRequest(format!(
                "File too large. Maximum: {:.1} GB",
                max_bytes as f64 / 1024.0 / 1024.0 / 1024.0
            )));
        }
        file.write_all(&bytes)
            .await
            .map_err(|e| ApiError::Internal(format!("Could not save upload: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("Could not save upload: {}", e)))?;
    Ok(size)
}

async fn read_text(field: &mut Field) -> Result<String, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk?);
        if bytes.len() > MAX_FIELD_BYTES {
            return Err(ApiError::BadRequest("Form field too large".to_string()));
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn read_fields(
    payload: &mut Multipart,
    target: Option<&UploadTarget<'_>>,
    form: &mut UploadForm,
) -> Result<(), ApiError> {
    while let Some(item) = payload.next().await {
        let mut field = item?;
        let disposition = field.content_disposition().clone();
        let name = disposition.get_name().unwrap_or("").to_string();

        if name != "file" {
            let value = read_text(&mut field).await?;
            form.fields.insert(name, value);
            continue;
        }
        let Some(target) = target else {
            // Drain files sent to routes that take none.
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        };
        if form.job.is_some() {
            return Err(ApiError::BadRequest("Only one file may be uploaded".to_string()));
        }
        let original = disposition.get_filename().unwrap_or("").to_string();
        if original.is_empty() {
            return Err(ApiError::BadRequest("No file selected".to_string()));
        }
        if !is_allowed_video(&original) {
            return Err(ApiError::BadRequest("Unsupported file format".to_string()));
        }
        let safe_name = secure_filename(&original);
        let extension = extension_of(&safe_name).unwrap_or_default();
        let job = Job::new(target.scratch_dir, Uuid::new_v4(), &extension, target.output_tag);
        // Registered before writing so a failed write is still cleaned up.
        form.job = Some(job.clone());
        form.filename = Some(safe_name);
        let size = save_field(&mut field, &job.input, target.max_bytes).await?;
        info!("Saved upload {:?} ({} bytes) as job {}", original, size, job.id);
    }
    Ok(())
}

/// Reads a multipart form, streaming its `file` part, if any, into a new job's
/// input path. Nothing is left on disk when reading fails.
async fn read_form(
    mut payload: Multipart,
    target: Option<UploadTarget<'_>>,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    match read_fields(&mut payload, target.as_ref(), &mut form).await {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard().await;
            Err(e)
        }
    }
}

fn upload_target<'a>(args: &'a Args, output_tag: &'a str) -> UploadTarget<'a> {
    UploadTarget {
        scratch_dir: &args.scratch_dir,
        output_tag,
        max_bytes: args.max_upload_bytes,
    }
}

fn parse_job_id(value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::BadRequest(format!("Invalid video id: {}", value)))
}

async fn serve_file(path: PathBuf, req: &HttpRequest) -> Result<HttpResponse, ApiError> {
    match NamedFile::open_async(&path).await {
        Ok(file) => Ok(file.into_response(req)),
        Err(_) => Err(ApiError::NotFound("File not found".to_string())),
    }
}

fn frame_file(path: &web::Path<(String, String)>) -> Result<(Uuid, String), ApiError> {
    let (job, file) = &**path;
    let id = parse_job_id(job)?;
    if !is_plain_filename(file) {
        return Err(ApiError::BadRequest(format!("Invalid file name: {}", file)));
    }
    Ok((id, file.clone()))
}

fn admin_frame_descriptors(req: &HttpRequest, job: &Job, frames: &[Frame]) -> Vec<ArtifactDescriptor> {
    let info = req.connection_info();
    let base = format!("{}://{}", info.scheme(), info.host());
    frames
        .iter()
        .map(|frame| {
            let url = format!("{}/admin/frame/{}/{}", base, job.id, frame.filename());
            ArtifactDescriptor::stored(frame, url)
        })
        .collect()
}

#[post("/upload")]
async fn upload(
    req: HttpRequest,
    payload: Multipart,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, Some(upload_target(&app_data.args, COMPRESS_TAG))).await?;
    let (job, filename) = form.require_job()?;
    let resolution = match Resolution::from_str(form.field("resolution").unwrap_or(DEFAULT_RESOLUTION)) {
        Ok(resolution) => resolution,
        Err(_) => {
            form.discard().await;
            return Err(ApiError::BadRequest("Unsupported resolution".to_string()));
        }
    };

    let output = app_data.pipeline.compress_only(&job, resolution).await?;
    let file = NamedFile::open_async(&output)
        .await
        .map_err(|e| ApiError::Internal(format!("Could not open compressed video: {}", e)))?
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format!(
                "compressed_{}p_{}",
                resolution.as_str(),
                filename
            ))],
        });
    Ok(file.into_response(&req))
}

#[post("/extract-frames")]
async fn extract_frames(
    payload: Multipart,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, Some(upload_target(&app_data.args, COMPRESS_TAG))).await?;
    let (job, _) = form.require_job()?;
    let interval = match form.field("interval").map(u32::from_str) {
        None => DEFAULT_FRAME_INTERVAL,
        Some(Ok(interval)) if interval > 0 => interval,
        Some(_) => {
            form.discard().await;
            return Err(ApiError::BadRequest(
                "interval must be a positive number of seconds".to_string(),
            ));
        }
    };
    let requested = form
        .field("bucket_enabled")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let store = match (&app_data.bucket_store, requested) {
        (Some(bucket), true) => bucket,
        _ => &app_data.local_store,
    };
    let bucket_enabled = requested && app_data.bucket_store.is_some();
    let batch = app_data
        .pipeline
        .extract_and_store(&job, interval, store)
        .await?;

    let errors = batch.errors();
    let mut body = json!({
        "success": true,
        "frames_count": batch.frames_count(),
        "frames": batch.frames,
        "bucket_type": store.kind().as_str(),
        "bucket_enabled": bucket_enabled,
    });
    if !errors.is_empty() {
        body["errors"] = json!(errors);
    }
    Ok(HttpResponse::Ok().json(body))
}

#[get("/static/frames/{job}/{file}")]
async fn static_frame(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let (id, file) = frame_file(&path)?;
    let local = app_data
        .local_store
        .local_path(&format!("{}/{}", id, file))
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;
    serve_file(local, &req).await
}

#[get("/health")]
async fn health(app_data: web::Data<AppData>) -> HttpResponse {
    match app_data.pipeline.encoder().probe().await {
        Ok(status) => HttpResponse::Ok().json(json!({"status": "ok", "ffmpeg": status})),
        Err(e) => HttpResponse::Ok().json(json!({"status": "error", "message": e.to_string()})),
    }
}

fn key_preview(key: Option<&str>) -> String {
    match key {
        Some(key) if key.chars().count() > KEY_PREVIEW_CHARS => {
            format!("{}...", key.chars().take(KEY_PREVIEW_CHARS).collect::<String>())
        }
        Some(_) => "set".to_string(),
        None => "not set".to_string(),
    }
}

#[get("/admin/test")]
async fn admin_test(app_data: web::Data<AppData>) -> HttpResponse {
    let args = &app_data.args;
    let url = args.supabase_url();
    let key = args.supabase_key();
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Admin panel is up",
        "supabase_configured": url.is_some() && key.is_some(),
        "supabase_url": url.unwrap_or_default(),
        "supabase_key_preview": key_preview(key.as_deref()),
        "supabase_bucket": args.supabase_bucket,
    }))
}

#[post("/admin/process-video")]
async fn admin_process_video(
    req: HttpRequest,
    payload: Multipart,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, Some(upload_target(&app_data.args, PUBLISH_TAG))).await?;
    let (job, _) = form.require_job()?;
    let frames = app_data
        .pipeline
        .prepare_for_publish(&job, DEFAULT_FRAME_INTERVAL)
        .await?;
    let frames = admin_frame_descriptors(&req, &job, &frames);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "video_id": job.id,
        "compressed_video_path": job.output.to_string_lossy(),
        "frames_count": frames.len(),
        "frames": frames,
    })))
}

#[post("/admin/extract-frames")]
async fn admin_extract_frames(
    req: HttpRequest,
    payload: Multipart,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, None).await?;
    let video_id = form
        .field("video_id")
        .ok_or_else(|| ApiError::BadRequest("video_id is required".to_string()))?;
    let job = Job::resume(&app_data.args.scratch_dir, parse_job_id(video_id)?, PUBLISH_TAG);
    if !tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
        return Err(ApiError::NotFound("Video not found".to_string()));
    }
    let frames = app_data
        .pipeline
        .extract(&job, DEFAULT_FRAME_INTERVAL)
        .await?;
    let frames = admin_frame_descriptors(&req, &job, &frames);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "frames_count": frames.len(),
        "frames": frames,
    })))
}

#[get("/admin/frame/{job}/{file}")]
async fn admin_frame(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let (id, file) = frame_file(&path)?;
    let job = Job::new(&app_data.args.scratch_dir, id, "", PUBLISH_TAG);
    serve_file(job.frame_path(&file), &req).await
}

#[post("/admin/save-to-portfolio")]
async fn admin_save_to_portfolio(
    payload: Multipart,
    app_data: web::Data<AppData>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, None).await?;
    let (Some(video_id), Some(category), Some(frame_path), Some(title)) = (
        form.field("video_id"),
        form.field("category"),
        form.field("frame_path"),
        form.field("title"),
    ) else {
        return Err(ApiError::BadRequest("Required fields are missing".to_string()));
    };
    let category = Category::from_str(category)
        .map_err(|_| ApiError::BadRequest(format!("Unknown category: {}", category)))?;
    let format = match form.field("format") {
        None => PortfolioFormat::default(),
        Some(format) => PortfolioFormat::from_str(format)
            .map_err(|_| ApiError::BadRequest(format!("Unknown format: {}", format)))?,
    };
    let id = parse_job_id(video_id)?;
    let portfolio = app_data.portfolio.as_ref().ok_or_else(|| {
        ApiError::Internal("Supabase is not configured. Check SUPABASE_URL and SUPABASE_KEY".to_string())
    })?;

    let job = Job::resume(&app_data.args.scratch_dir, id, PUBLISH_TAG);
    let request = PublishRequest {
        category,
        frame_path: frame_path.to_string(),
        title: title.to_string(),
        description: form.field("description").unwrap_or("").to_string(),
        format,
    };
    let row = portfolio.publish(&job, &request).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Video added to portfolio",
        "data": row,
    })))
}

/// Answers CORS preflight requests; everything else unmatched is a JSON 404.
pub async fn fallback(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::Ok().finish()
    } else {
        ApiError::NotFound("Not found".to_string()).error_response()
    }
}

pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Headers", "Content-Type,Authorization"))
        .add(("Access-Control-Allow-Methods", "GET,PUT,POST,DELETE,OPTIONS"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload)
        .service(extract_frames)
        .service(static_frame)
        .service(health)
        .service(admin_test)
        .service(admin_process_video)
        .service(admin_extract_frames)
        .service(admin_frame)
        .service(admin_save_to_portfolio);
}
