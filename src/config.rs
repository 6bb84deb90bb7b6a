use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

/// Command-line and environment configuration, read once at start-up.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Video upload, compression and frame extraction service")]
pub struct Args {
    #[arg(long, env, default_value = "0.0.0.0:5000")]
    pub bind_addr: String,
    #[arg(long, env, default_value = "temp")]
    pub scratch_dir: PathBuf,
    #[arg(long, env, default_value = "static/frames")]
    pub static_frames_dir: PathBuf,
    #[arg(long, env, default_value = "/static/frames")]
    pub static_frames_url: String,
    #[arg(long, env, default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,
    #[arg(long, env, default_value_t = 3600)]
    pub encode_timeout_secs: u64,
    #[arg(long, env, default_value_t = 2 * 1024 * 1024 * 1024_u64)]
    pub max_upload_bytes: u64,
    #[arg(long, env)]
    pub bucket_enabled: bool,
    #[arg(long, env, value_enum, default_value_t = StoreKind::Local)]
    pub bucket_type: StoreKind,
    #[arg(long, env)]
    pub bucket_name: Option<String>,
    #[arg(long, env)]
    pub aws_access_key_id: Option<String>,
    #[arg(long, env)]
    pub aws_secret_access_key: Option<String>,
    #[arg(long, env, default_value = "us-east-1")]
    pub aws_region: String,
    #[arg(long, env, default_value = "https://storage.yandexcloud.net")]
    pub yandex_endpoint: String,
    #[arg(long, env, default_value = "ru-central1")]
    pub yandex_region: String,
    #[arg(long, env)]
    pub supabase_url: Option<String>,
    #[arg(long, env)]
    pub supabase_key: Option<String>,
    #[arg(long, env, default_value = "frames")]
    pub supabase_bucket: String,
    #[arg(long, env, default_value = "portfolio")]
    pub portfolio_bucket: String,
    #[arg(long, env, default_value = "portfolio")]
    pub portfolio_table: String,
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    S3,
    Yandex,
    Supabase,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Local => "local",
            StoreKind::S3 => "s3",
            StoreKind::Yandex => "yandex",
            StoreKind::Supabase => "supabase",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Backend selection plus everything that backend needs. Empty strings are
/// kept as `None` so the store factory can report what is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Local {
        root: PathBuf,
        url_prefix: String,
    },
    S3 {
        bucket: Option<String>,
        region: String,
        credentials: Option<Credentials>,
    },
    Yandex {
        bucket: Option<String>,
        endpoint: String,
        region: String,
        credentials: Option<Credentials>,
    },
    Supabase {
        url: Option<String>,
        key: Option<String>,
        bucket: String,
    },
}

impl StoreConfig {
    pub fn kind(&self) -> StoreKind {
        match self {
            StoreConfig::Local { .. } => StoreKind::Local,
            StoreConfig::S3 { .. } => StoreKind::S3,
            StoreConfig::Yandex { .. } => StoreKind::Yandex,
            StoreConfig::Supabase { .. } => StoreKind::Supabase,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl Args {
    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    pub fn supabase_url(&self) -> Option<String> {
        non_empty(&self.supabase_url).map(|u| u.trim_end_matches('/').to_owned())
    }

    pub fn supabase_key(&self) -> Option<String> {
        non_empty(&self.supabase_key)
    }

    fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            access_key_id: non_empty(&self.aws_access_key_id)?,
            secret_access_key: non_empty(&self.aws_secret_access_key)?,
        })
    }

    /// The always-available store that copies frames into the public static directory.
    pub fn local_store_config(&self) -> StoreConfig {
        StoreConfig::Local {
            root: self.static_frames_dir.clone(),
            url_prefix: self.static_frames_url.clone(),
        }
    }

    /// The store selected by `BUCKET_TYPE`.
    pub fn bucket_store_config(&self) -> StoreConfig {
        match self.bucket_type {
            StoreKind::Local => self.local_store_config(),
            StoreKind::S3 => StoreConfig::S3 {
                bucket: non_empty(&self.bucket_name),
                region: self.aws_region.clone(),
                credentials: self.credentials(),
            },
            StoreKind::Yandex => StoreConfig::Yandex {
                bucket: non_empty(&self.bucket_name),
                endpoint: self.yandex_endpoint.trim_end_matches('/').to_owned(),
                region: self.yandex_region.clone(),
                credentials: self.credentials(),
            },
            StoreKind::Supabase => StoreConfig::Supabase {
                url: self.supabase_url(),
                key: self.supabase_key(),
                bucket: self.supabase_bucket.clone(),
            },
        }
    }
}
