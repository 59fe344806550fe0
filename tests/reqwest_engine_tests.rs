mod common;

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_bytes, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courier::auth::Credential;
use courier::config::ControllerConfig;
use courier::controller::{Progress, ProgressHandler, RequestController};
use courier::error::ErrorKind;
use courier::request::{HttpMethod, RequestBody, TaskId, TransferKind, UploadSource};
use courier::transport::{
    ReqwestEngine, SessionKind, TaskEvents, TransportEngine, TransportErrorKind,
    TransportRequest,
};

use common::{collector, next_outcome, test_executor};

fn live_controller(server: &MockServer, download_dir: &std::path::Path) -> RequestController {
    let config = ControllerConfig::builder()
        .base_url(server.uri())
        .download_directory(download_dir.to_path_buf())
        .request_timeout_secs(10)
        .build();
    RequestController::builder(config)
        .with_executor(test_executor())
        .build()
        .expect("controller")
}

fn progress_recorder() -> (ProgressHandler, Arc<Mutex<Vec<(u64, Option<u64>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler: ProgressHandler = {
        let seen = seen.clone();
        Arc::new(move |progress: Progress| {
            seen.lock()
                .unwrap()
                .push((progress.bytes_done, progress.bytes_total))
        })
    };
    (handler, seen)
}

#[tokio::test]
async fn data_request_returns_parsed_json_with_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .and(query_param("verbose", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();
    let (on_progress, seen) = progress_recorder();

    let descriptor = controller
        .descriptor(HttpMethod::Get, "users/1", &[("verbose", "true")])
        .unwrap();
    controller.submit(descriptor, completion, Some(on_progress));
    let outcome = next_outcome(&mut rx).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.response.parsed, Some(json!({"id": 1})));
    let total = outcome.response.body.len() as u64;
    assert_eq!(seen.lock().unwrap().last().copied(), Some((total, Some(total))));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"name":"Ada"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();

    controller
        .post("users", RequestBody::Json(json!({"name": "Ada"})), None, completion)
        .unwrap();

    assert_eq!(next_outcome(&mut rx).await.response.status, 201);
}

#[tokio::test]
async fn server_errors_carry_the_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "db down"})))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();

    controller.get("broken", &[], completion).unwrap();
    let outcome = next_outcome(&mut rx).await;

    let error = outcome.error.expect("500 is an error");
    assert_eq!(error.kind(), ErrorKind::HttpStatus);
    assert_eq!(outcome.response.parsed, Some(json!({"error": "db down"})));
}

#[tokio::test]
async fn redirects_are_followed_and_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();

    controller.get("old", &[], completion).unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.response.text(), "moved");
    assert_eq!(outcome.response.url.path(), "/new");
    let redirect = outcome.response.redirect.expect("redirect reported");
    assert_eq!(redirect.status, 301);
    assert_eq!(redirect.url.path(), "/old");
    assert_eq!(redirect.header("location"), Some("/new"));
}

#[tokio::test]
async fn basic_challenge_is_answered_with_the_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"api\""),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::builder()
        .base_url(server.uri())
        .download_directory(dir.path().to_path_buf())
        .build();
    let controller = RequestController::builder(config)
        .with_executor(test_executor())
        .with_credential(Credential::basic("alice", "secret"))
        .build()
        .unwrap();
    let (completion, mut rx) = collector();

    // A stale explicit header forces the server to challenge.
    let descriptor = controller
        .descriptor(HttpMethod::Get, "protected", &[])
        .unwrap()
        .with_header("authorization", "Bearer stale");
    controller.submit(descriptor, completion, None);
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.response.status, 200);
    assert_eq!(outcome.response.text(), "welcome");
}

#[tokio::test]
async fn rejected_challenge_surfaces_the_401() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Basic realm=\"api\""),
        )
        .expect(2)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::builder()
        .base_url(server.uri())
        .download_directory(dir.path().to_path_buf())
        .build();
    let controller = RequestController::builder(config)
        .with_executor(test_executor())
        .with_credential(Credential::basic("alice", "wrong"))
        .build()
        .unwrap();
    let (completion, mut rx) = collector();

    controller.get("protected", &[], completion).unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.error.expect("401").error().status(), Some(401));
}

#[tokio::test]
async fn download_lands_in_the_download_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/report.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n1,2\n".to_vec()))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();
    let (on_progress, seen) = progress_recorder();

    controller
        .download_file("files/report.csv", None, None, Some(on_progress), completion)
        .unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert!(outcome.is_success());
    let file = outcome.response.file.expect("downloaded file");
    assert!(file.starts_with(dir.path()));
    assert_eq!(std::fs::read(&file).unwrap(), b"a,b\n1,2\n".to_vec());
    assert_eq!(seen.lock().unwrap().last().copied(), Some((8, Some(8))));
}

#[tokio::test]
async fn download_honours_explicit_destination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("saved.png");
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();

    controller
        .download_file("image.png", Some(destination.clone()), None, None, completion)
        .unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.response.file, Some(destination.clone()));
    assert_eq!(std::fs::read(destination).unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
}

#[tokio::test]
async fn upload_streams_file_contents() {
    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/blobs/1"))
        .and(header("content-type", "application/octet-stream"))
        .and(body_bytes(payload.clone()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("payload.bin");
    std::fs::write(&source, &payload).unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();
    let (on_progress, seen) = progress_recorder();

    controller
        .upload_file(
            HttpMethod::Put,
            "blobs/1",
            UploadSource::File(source),
            Some("application/octet-stream"),
            Some(on_progress),
            completion,
        )
        .unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.response.status, 201);
    let total = payload.len() as u64;
    let seen = seen.lock().unwrap().clone();
    assert!(seen.len() > 1, "expected per-chunk progress, got {seen:?}");
    assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert!(seen.iter().all(|(_, expected)| *expected == Some(total)));
    assert_eq!(seen.last().copied(), Some((total, Some(total))));
}

#[tokio::test]
async fn missing_upload_file_is_a_transport_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let controller = live_controller(&server, dir.path());
    let (completion, mut rx) = collector();

    controller
        .upload_file(
            HttpMethod::Post,
            "blobs",
            UploadSource::File(dir.path().join("absent.bin")),
            None,
            None,
            completion,
        )
        .unwrap();
    let outcome = next_outcome(&mut rx).await;

    let error = outcome.error.expect("io failure");
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(outcome.response.status, 0);
}

#[tokio::test]
async fn detached_engine_reports_connection_failures() {
    let engine = ReqwestEngine::default();
    let request = TransportRequest {
        task_id: TaskId::next(),
        session: SessionKind::Ephemeral,
        method: HttpMethod::Get,
        url: reqwest::Url::parse("http://127.0.0.1:9/unreachable").unwrap(),
        headers: Default::default(),
        body: Vec::new(),
        transfer: TransferKind::Data,
    };
    let events = TaskEvents::detached(request.task_id);

    let err = engine.perform(request, &events).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Connect);
}
