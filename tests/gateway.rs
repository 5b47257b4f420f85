//! Gateway integration tests.
//!
//! Capability URLs are issued by `FileStorage` and redeemed against the axum
//! router in-process via `tower::ServiceExt::oneshot`; no sockets involved.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use signed_object_store::{
    FileStorage, Gateway, HashSecret, Storage, app,
    config::FileStorageConfig,
    models::{
        access::Access,
        options::{GetOptions, PutOptions},
    },
    services::storage_service::StorageService,
};
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "test-secret";
const BASE_URL: &str = "http://gateway.test";
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

struct Harness {
    dir: TempDir,
    issuer: FileStorage,
    app: Router,
}

fn fs_config(dir: &TempDir, secret: &str) -> FileStorageConfig {
    FileStorageConfig {
        base_path: dir.path().join("objects"),
        meta_path: dir.path().join("meta"),
        tmp_path: dir.path().join("tmp"),
        hash_secret: Some(HashSecret::new(secret)),
        public_url: Some(BASE_URL.to_string()),
    }
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fs_config(&dir, SECRET);
    let store = StorageService::new(
        config.base_path.clone(),
        config.meta_path.clone(),
        config.tmp_path.clone(),
    );
    let app = app(Gateway::new(store, HashSecret::new(SECRET)));
    let issuer = FileStorage::new(config);
    Harness { dir, issuer, app }
}

/// Strip the scheme and authority so the URL can be sent to the router.
fn local(url: &str) -> &str {
    url.strip_prefix(BASE_URL).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: &'static str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn abc_options(access: Access) -> PutOptions {
    PutOptions::new(3)
        .with_mime("text/plain")
        .with_sha256(ABC_SHA256)
        .with_access(access)
}

fn tmp_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path().join("tmp"))
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn private_object_round_trip() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::Private))
        .await
        .unwrap();
    assert!(signed.headers.is_empty());

    let (status, body) = send(&h.app, "PUT", local(&signed.url), "abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "File uploaded and verified");
    assert!(h.dir.path().join("objects/a/.b").exists());
    assert!(!h.dir.path().join("objects/a/b").exists());

    let (status, _) = send(&h.app, "GET", "/a/b", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(local(&signed.url))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "3");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"abc");
}

#[tokio::test]
async fn private_object_rejects_foreign_capability() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::Private))
        .await
        .unwrap();
    send(&h.app, "PUT", local(&signed.url), "abc").await;

    // Valid for a/c, so the hash cannot match a/b.
    let other = h
        .issuer
        .put_signed_url("a/c", abc_options(Access::Private))
        .await
        .unwrap();
    let (_, query) = other.url.split_once('?').unwrap();
    let (status, body) = send(&h.app, "GET", &format!("/a/b?{query}"), "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Forbidden");

    let (status, _) = send(&h.app, "GET", "/a/b?hash=00", "").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn private_object_opens_with_get_capability() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("docs/readme.txt", PutOptions::new(3))
        .await
        .unwrap();
    let (status, _) = send(&h.app, "PUT", local(&signed.url), "abc").await;
    assert_eq!(status, StatusCode::OK);

    let url = h
        .issuer
        .get_signed_url("docs/readme.txt", GetOptions::with_expires(60))
        .await
        .unwrap();
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri(local(&url)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");

    // `mime` is not part of a GET capability, so appending one changes nothing.
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("{}&mime=text%2Fhtml", local(&url)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
}

#[tokio::test]
async fn public_object_lifecycle() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();
    let (status, _) = send(&h.app, "PUT", local(&signed.url), "abc").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, "GET", "/a/b", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "abc");

    let sidecar = std::fs::read_to_string(h.dir.path().join("meta/a/b.json")).unwrap();
    let sidecar: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
    assert_eq!(sidecar["access"], "public-read");
    assert_eq!(sidecar["sha256"], ABC_SHA256);

    assert!(h.issuer.list_all("", None).await.unwrap().contains(&"a/b".to_string()));
    assert_eq!(h.issuer.list_dir("", None).await.unwrap(), vec!["a"]);

    h.issuer.delete("a/b").await.unwrap();
    assert!(h.issuer.list_all("", None).await.unwrap().is_empty());
    let (status, _) = send(&h.app, "GET", "/a/b", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reupload_can_change_tier() {
    let h = harness();
    let public = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();
    send(&h.app, "PUT", local(&public.url), "abc").await;
    let private = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::Private))
        .await
        .unwrap();
    let (status, _) = send(&h.app, "PUT", local(&private.url), "abc").await;
    assert_eq!(status, StatusCode::OK);

    assert!(!h.dir.path().join("objects/a/b").exists());
    let (status, _) = send(&h.app, "GET", "/a/b", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn size_mismatch_leaves_nothing_behind() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();

    for body in ["abcd", "ab"] {
        let (status, text) = send(&h.app, "PUT", local(&signed.url), body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{body}");
        assert_eq!(text, "File too large/small");
    }
    assert!(!h.dir.path().join("objects/a").exists());
    assert!(!h.dir.path().join("meta/a/b.json").exists());
    assert!(tmp_is_empty(&h.dir));
}

#[tokio::test]
async fn checksum_mismatch_leaves_nothing_behind() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();

    let (status, text) = send(&h.app, "PUT", local(&signed.url), "xyz").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(text, "Mismatch sha256");
    assert!(!h.dir.path().join("objects/a").exists());
    assert!(!h.dir.path().join("meta/a/b.json").exists());
    assert!(tmp_is_empty(&h.dir));
}

#[tokio::test]
async fn foreign_secret_is_forbidden_before_staging() {
    let h = harness();
    let forger = FileStorage::new(fs_config(&h.dir, "not-the-secret"));
    let signed = forger
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();

    let (status, body) = send(&h.app, "PUT", local(&signed.url), "abc").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Forbidden");
    assert!(!h.dir.path().join("tmp").exists());
}

#[tokio::test]
async fn tampered_options_are_forbidden() {
    let h = harness();
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::Private))
        .await
        .unwrap();
    let escalated = signed.url.replace("access=private", "access=public-read");
    assert_ne!(escalated, signed.url);

    let (status, _) = send(&h.app, "PUT", local(&escalated), "abc").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_requests_are_unprocessable() {
    let h = harness();

    let (status, body) = send(&h.app, "PUT", "/a/b?size=3", "abc").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("[hash] Required"), "{body}");

    let (status, body) = send(&h.app, "PUT", "/a/b?size=lots&hash=x&salt=1", "abc").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.starts_with("[size]"), "{body}");

    for uri in ["/", "/a/../b", "/.hidden", "/a//b", "/a/", "/a/%FF"] {
        let (status, _) = send(&h.app, "GET", uri, "").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
    }
}

#[tokio::test]
async fn missing_metadata_is_not_found() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/never/uploaded", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Metadata not found");
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let h = harness();
    // The object exists and is public, so a 405 cannot come from a missing key.
    let signed = h
        .issuer
        .put_signed_url("a/b", abc_options(Access::PublicRead))
        .await
        .unwrap();
    let (status, _) = send(&h.app, "PUT", local(&signed.url), "abc").await;
    assert_eq!(status, StatusCode::OK);

    for (method, uri) in [
        ("HEAD", "/a/b"),
        ("DELETE", "/a/b"),
        ("POST", "/a/b"),
        ("PATCH", "/"),
    ] {
        let (status, body) = send(&h.app, method, uri, "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
        assert_eq!(body, "Method Not Allowed");
    }
}

#[tokio::test]
async fn probes_report_disk_state() {
    let h = harness();
    let (status, _) = send(&h.app, "GET", "/-/healthz", "").await;
    assert_eq!(status, StatusCode::OK);

    // Roots are created lazily, so readiness fails until they exist.
    let (status, body) = send(&h.app, "GET", "/-/readyz", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains(r#""status":"error""#), "{body}");

    StorageService::new(
        h.dir.path().join("objects"),
        h.dir.path().join("meta"),
        h.dir.path().join("tmp"),
    )
    .ensure_roots()
    .await
    .unwrap();
    let (status, body) = send(&h.app, "GET", "/-/readyz", "").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["checks"]["tmp"]["ok"], true);
    assert!(tmp_is_empty(&h.dir));
}
