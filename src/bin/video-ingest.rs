use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use video_ingest::encoder::EncoderStatus;
use video_ingest::server::{configure, cors_headers, fallback, AppData};
use video_ingest::{ArtifactStore, Args};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let bind_addr = args.bind_addr.clone();
    let app_data = web::Data::new(AppData::from_args(args)?);

    match app_data.pipeline.encoder().probe().await {
        Ok(EncoderStatus::Installed) => info!("FFmpeg found"),
        Ok(EncoderStatus::NotFound) => warn!(
            "FFmpeg not found at {:?}; uploads will fail until it is installed",
            app_data.pipeline.encoder().binary()
        ),
        Err(e) => warn!("Could not check for FFmpeg: {}", e),
    }
    if let Some(store) = &app_data.bucket_store {
        info!("Bucket storage enabled: {}", store.kind().as_str());
    }

    info!("Listening on {}", bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .wrap(cors_headers())
            .wrap(Logger::default())
            .configure(configure)
            .default_service(web::to(fallback))
    })
    .bind(&bind_addr)
    .with_context(|| format!("binding {}", bind_addr))?
    .run()
    .await
    .context("running HTTP server")
}
