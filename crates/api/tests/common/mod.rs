#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use lumina_core::generator::GeneratorRunner;
use lumina_core::job::{Job, JobStatus, NewJob};
use lumina_core::storage::ArtifactStore;
use lumina_core::types::JobId;
use tempfile::TempDir;
use tower::ServiceExt;

use lumina_api::config::{GeneratorConfig, ServerConfig};
use lumina_api::engine::JobScheduler;
use lumina_api::router::build_app_router;
use lumina_api::state::AppState;

/// Argument parsing shared by every stub generator. Leaves the output
/// directory in `$OUT` and the property id in `$ID`.
const STUB_PRELUDE: &str = r#"#!/bin/bash
OUT=""
ID=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) OUT="$2"; shift 2 ;;
    --id) ID="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

/// Renders two files after a short pause and reports success.
pub const SUCCESS_STUB: &str = r#"
echo '::PROGRESS::9x16::50' >&2
sleep 0.3
printf 'video a' > "$OUT/a.mp4"
printf 'video b' > "$OUT/b.mp4"
echo '::PROGRESS::9x16::100' >&2
echo 'Rendering finished'
echo '{"status": "success", "files": ["a.mp4", "b.mp4"]}'
"#;

/// Runs until killed.
pub const HANGING_STUB: &str = "sleep 30\n";

/// Build a test `ServerConfig` rooted in `dir`, running `script` with bash.
pub fn test_config(dir: &std::path::Path, script: PathBuf) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        uploads_dir: dir.join("uploads"),
        outputs_dir: dir.join("outputs"),
        max_upload_bytes: 16 * 1024 * 1024,
        redispatch_delay_ms: 100,
        generator: GeneratorConfig {
            bundled_path: dir.join("bin").join("generator"),
            resources_path: None,
            python_bin: "bash".to_string(),
            script_path: script,
            timeout_secs: None,
        },
    }
}

/// Full application wired to a stub generator in a scratch directory.
pub struct TestApp {
    pub router: Router,
    pub scheduler: Arc<JobScheduler>,
    pub store: Arc<ArtifactStore>,
    pub dir: TempDir,
}

/// Build the application exactly as `main.rs` does, with the generator
/// replaced by a bash script whose body is `stub_body`.
pub async fn build_test_app(stub_body: &str) -> TestApp {
    build_test_app_with(stub_body, |_| {}).await
}

/// Like [`build_test_app`], with `customize` applied to the config first.
pub async fn build_test_app_with(
    stub_body: &str,
    customize: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let dir = tempfile::tempdir().expect("create temp dir");
    let script = dir.path().join("generator.sh");
    std::fs::write(&script, format!("{STUB_PRELUDE}{stub_body}")).expect("write stub generator");

    let mut config = test_config(dir.path(), script);
    customize(&mut config);
    let store = Arc::new(ArtifactStore::new(&config.uploads_dir, &config.outputs_dir));
    store.ensure_roots().await.expect("create artifact roots");

    let runner = Arc::new(GeneratorRunner::new(config.generator.launch_plan()));
    let scheduler = Arc::new(
        JobScheduler::new(runner, Arc::clone(&store)).with_redispatch_delay(config.redispatch_delay()),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        scheduler: Arc::clone(&scheduler),
        store: Arc::clone(&store),
    };

    TestApp {
        router: build_app_router(state, &config),
        scheduler,
        store,
        dir,
    }
}

impl TestApp {
    /// Submit a job straight to the scheduler, bypassing HTTP.
    pub async fn submit(&self, property_id: &str) -> JobId {
        let id = self.scheduler.allocate_id().await;
        let input = NewJob {
            input_images: vec![self.dir.path().join("photo.jpg")],
            settings: serde_json::json!({}),
            property_id: Some(property_id.to_string()),
            output_dir: self.store.output_dir(id),
        };
        self.scheduler.submit(id, input).await.expect("submit job");
        id
    }

    pub async fn status(&self, id: JobId) -> JobStatus {
        self.scheduler.get(id).await.expect("job exists").status
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_empty(&self, uri: &str) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// Poll until job `id` reaches `expected`, failing after ten seconds.
pub async fn wait_for_status(scheduler: &JobScheduler, id: JobId, expected: JobStatus) -> Job {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = scheduler.get(id).await.expect("job exists");
        if job.status == expected {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} stuck in {} waiting for {expected}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "lumina-test-boundary";

/// One part of a multipart form.
#[derive(Clone, Copy)]
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

/// Build a `multipart/form-data` POST request.
pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
