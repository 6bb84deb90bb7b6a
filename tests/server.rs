use std::path::Path;

use actix_web::http::{header, Method, StatusCode};
use actix_web::{test, web, App};
use clap::Parser;
use serde_json::Value;
use tempfile::TempDir;
use video_ingest::server::{configure, cors_headers, fallback, AppData};
use video_ingest::{Args, Encoder, Pipeline};

const WORKING_ENCODER: &str = r#"
for last; do :; done
case "$last" in
  -version) echo "ffmpeg version test" ;;
  *frame_%04d.jpg)
    dir=$(dirname "$last")
    for i in 0001 0002 0003 0004 0005; do printf 'jpeg %s' "$i" > "$dir/frame_$i.jpg"; done ;;
  *) cp "$3" "$last" ;;
esac
"#;

const BOUNDARY: &str = "video-ingest-test-boundary";

fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

fn args(dir: &Path) -> Args {
    Args::try_parse_from([
        "video-ingest",
        "--scratch-dir",
        &dir.join("scratch").to_string_lossy(),
        "--static-frames-dir",
        &dir.join("static").join("frames").to_string_lossy(),
        "--static-frames-url",
        "/static/frames",
    ])
    .unwrap()
}

fn app_data(dir: &TempDir, script: Option<&str>) -> web::Data<AppData> {
    let data = AppData::from_args(args(dir.path())).unwrap();
    let encoder = match script {
        Some(script) => {
            let path = dir.path().join("fake-ffmpeg.sh");
            std::fs::write(&path, script).unwrap();
            Encoder::new("sh").with_leading_args([path])
        }
        None => Encoder::new("/nonexistent/bin/ffmpeg-for-tests"),
    };
    web::Data::new(AppData {
        pipeline: Pipeline::new(encoder),
        ..data
    })
}

fn form(uri: &str, fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> test::TestRequest {
    let (content_type, body) = multipart(fields, file);
    test::TestRequest::post()
        .uri(uri)
        .insert_header((header::CONTENT_TYPE, content_type))
        .set_payload(body)
}

macro_rules! init_app {
    ($data:expr) => {
        test::init_service(
            App::new()
                .app_data($data.clone())
                .wrap(cors_headers())
                .configure(configure)
                .default_service(web::to(fallback)),
        )
        .await
    };
}

fn scratch_entries(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("scratch")).unwrap().count()
}

#[actix_web::test]
async fn health_reports_missing_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, serde_json::json!({"status": "ok", "ffmpeg": "not_found"}));
}

#[actix_web::test]
async fn health_reports_installed_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, Some(WORKING_ENCODER)));
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["ffmpeg"], "installed");
}

#[actix_web::test]
async fn upload_validation_errors_are_json_400s() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, Some(WORKING_ENCODER)));

    let req = form("/upload", &[("resolution", "720")], None).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No file uploaded");

    let req = form("/upload", &[], Some(("clip.gif", b"GIF89a"))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Unsupported file format");

    let file: Option<(&str, &[u8])> = Some(("clip.mp4", b"video"));
    let req = form("/upload", &[("resolution", "240")], file).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Unsupported resolution");
    assert_eq!(scratch_entries(&dir), 0);
}

#[actix_web::test]
async fn upload_streams_compressed_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, Some(WORKING_ENCODER)));
    let video: &[u8] = b"not really a video";
    let req = form("/upload", &[("resolution", "480")], Some(("my clip.mov", video))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("Access-Control-Allow-Origin").unwrap(),
        "*"
    );
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"), "{}", disposition);
    assert!(disposition.contains("compressed_480p_my_clip.mov"), "{}", disposition);
    assert_eq!(test::read_body(resp).await.as_ref(), b"not really a video");
}

#[actix_web::test]
async fn upload_failure_is_500_and_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));
    let req = form("/upload", &[], Some(("clip.mp4", b"video"))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("FFmpeg not found"));
    assert_eq!(scratch_entries(&dir), 0);
}

#[actix_web::test]
async fn extract_frames_stores_locally_and_serves_them() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, Some(WORKING_ENCODER)));

    let req = form("/extract-frames", &[("interval", "0")], Some(("clip.mp4", b"v"))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let fields = [("interval", "15"), ("bucket_enabled", "true")];
    let req = form("/extract-frames", &fields, Some(("clip.mp4", b"v"))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["frames_count"], 5);
    assert_eq!(body["bucket_type"], "local");
    assert_eq!(body["bucket_enabled"], false);
    assert!(body.get("errors").is_none());
    let frames = body["frames"].as_array().unwrap();
    let indices: Vec<_> = frames.iter().map(|f| f["index"].as_u64().unwrap()).collect();
    assert_eq!(indices, [1, 2, 3, 4, 5]);

    let url = frames[2]["url"].as_str().unwrap();
    assert!(url.starts_with("/static/frames/"), "{}", url);
    let resp = test::call_service(&app, test::TestRequest::get().uri(url).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.as_ref(), b"jpeg 0003");
}

#[actix_web::test]
async fn frame_routes_reject_bad_tokens_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));

    let req = test::TestRequest::get().uri("/admin/frame/not-a-uuid/frame_0001.jpg").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/static/frames/{}/frame_0001.jpg", uuid::Uuid::new_v4());
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn admin_workflow_keeps_frames_for_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, Some(WORKING_ENCODER)));

    let req = form("/admin/process-video", &[], Some(("promo.webm", b"v"))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let video_id = body["video_id"].as_str().unwrap().to_string();
    assert_eq!(body["frames_count"], 5);
    assert!(body["compressed_video_path"]
        .as_str()
        .unwrap()
        .ends_with(&format!("{}_output_720p.mp4", video_id)));
    let first = body["frames"][0]["url"].as_str().unwrap();
    assert!(
        first.ends_with(&format!("/admin/frame/{}/frame_0001.jpg", video_id)),
        "{}",
        first
    );

    let req = form("/admin/extract-frames", &[("video_id", video_id.as_str())], None).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["frames_count"], 5);

    let uri = format!("/admin/frame/{}/frame_0002.jpg", video_id);
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.as_ref(), b"jpeg 0002");

    let missing = uuid::Uuid::new_v4().to_string();
    let req = form("/admin/extract-frames", &[("video_id", missing.as_str())], None).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn save_to_portfolio_validates_form() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));
    let id = uuid::Uuid::new_v4().to_string();

    let req = form("/admin/save-to-portfolio", &[("video_id", id.as_str())], None).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Required fields are missing");

    let fields = [
        ("video_id", id.as_str()),
        ("category", "cooking"),
        ("frame_path", "/admin/frame/x/frame_0001.jpg"),
        ("title", "Promo"),
    ];
    let req = form("/admin/save-to-portfolio", &fields, None).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Unknown category: cooking");
}

#[actix_web::test]
async fn preflight_and_unknown_routes() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));

    let req = test::TestRequest::default()
        .method(Method::OPTIONS)
        .uri("/extract-frames")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("Access-Control-Allow-Methods").unwrap(),
        "GET,PUT,POST,DELETE,OPTIONS"
    );

    let resp = test::call_service(&app, test::TestRequest::get().uri("/nope").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn admin_test_reports_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_data(&dir, None));
    let resp = test::call_service(&app, test::TestRequest::get().uri("/admin/test").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert!(body["supabase_configured"].is_boolean());
    assert!(body["supabase_key_preview"].is_string());
}
