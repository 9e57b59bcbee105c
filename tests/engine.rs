//! Exercises the full `ExecuteRule` path end to end against two mock registries
//! standing in for a source and a target, proving the registry client, engine,
//! and pool compose correctly rather than only in isolation.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use replicore::engine::ReplicationEngine;
use replicore::model::{ProgressEvent, RegistryEndpoint, ReplicationRule, RepositorySelector};
use replicore::registry::RegistryClient;

const CONFIG_DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
const LAYER_DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";
const MANIFEST_DIGEST: &str = "sha256:3333333333333333333333333333333333333333333333333333333333333333";

const AMD64_CONFIG_DIGEST: &str = "sha256:4444444444444444444444444444444444444444444444444444444444444444";
const AMD64_LAYER_DIGEST: &str = "sha256:5555555555555555555555555555555555555555555555555555555555555555";
const AMD64_MANIFEST_DIGEST: &str = "sha256:6666666666666666666666666666666666666666666666666666666666666666";
const ARM64_MANIFEST_DIGEST: &str = "sha256:9999999999999999999999999999999999999999999999999999999999999999";
const INDEX_DIGEST: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Echoes the `digest` query parameter back as `Docker-Content-Digest`, the way a
/// real registry confirms what it actually stored at blob commit time.
struct CommitResponder;

impl Respond for CommitResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let digest = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "digest")
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        ResponseTemplate::new(201).insert_header("Docker-Content-Digest", digest.as_str())
    }
}

#[tokio::test]
async fn test_single_arch_copy_to_empty_target() {
    let source = MockServer::start().await;
    let target = MockServer::start().await;

    // --- source ---
    Mock::given(method("GET")).and(path("/v2/")).respond_with(ResponseTemplate::new(200)).mount(&source).await;

    Mock::given(method("GET"))
        .and(path("/v2/library/nginx/tags/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": ["1.0"] })))
        .mount(&source)
        .await;

    let manifest_json = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": { "mediaType": "application/vnd.oci.image.config.v1+json", "digest": CONFIG_DIGEST, "size": 100 },
        "layers": [{ "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": LAYER_DIGEST, "size": 200 }],
    });
    Mock::given(method("GET"))
        .and(path("/v2/library/nginx/manifests/1.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", MANIFEST_DIGEST)
                .insert_header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
                .set_body_json(&manifest_json),
        )
        .mount(&source)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/library/nginx/blobs/{CONFIG_DIGEST}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 100]))
        .mount(&source)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/nginx/blobs/{LAYER_DIGEST}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 200]))
        .mount(&source)
        .await;

    // --- target: empty, no project yet, nothing mountable ---
    Mock::given(method("GET")).and(path("/v2/")).respond_with(ResponseTemplate::new(200)).mount(&target).await;
    Mock::given(method("GET"))
        .and(path("/api/v2.0/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&target)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2.0/projects"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&target)
        .await;

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/mirror/nginx/blobs/{CONFIG_DIGEST}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&target)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/mirror/nginx/blobs/{LAYER_DIGEST}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&target)
        .await;

    // Mount attempts (cross-registry, always rejected here) and the real upload
    // init share the same endpoint; a 202 with no Location on the mount path reads
    // as NotMounted, and the real init always carries a Location.
    Mock::given(method("POST"))
        .and(path("/v2/mirror/nginx/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/mirror/nginx/blobs/uploads/session"))
        .mount(&target)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v2/mirror/nginx/blobs/uploads/session"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/mirror/nginx/blobs/uploads/session"))
        .mount(&target)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/mirror/nginx/blobs/uploads/session"))
        .respond_with(CommitResponder)
        .mount(&target)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/mirror/nginx/manifests/1.0"))
        .respond_with(ResponseTemplate::new(201).insert_header("Docker-Content-Digest", MANIFEST_DIGEST))
        .mount(&target)
        .await;

    let rule = ReplicationRule::builder()
        .id("mirror-nginx".into())
        .name("mirror nginx".into())
        .source(RepositorySelector::builder().project("library".into()).repo("nginx".into()).build())
        .target(RepositorySelector::builder().project("mirror".into()).build())
        .build();

    let source_client = Arc::new(RegistryClient::new(RegistryEndpoint::new(source.uri())).unwrap());
    let target_client = Arc::new(RegistryClient::new(RegistryEndpoint::new(target.uri())).unwrap());
    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(64);
    let engine = ReplicationEngine::new(source_client, target_client, progress_tx);

    let drain = tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });

    let outcome = engine.run(&rule, "exec-1", 2, CancellationToken::new()).await.unwrap();
    drain.await.unwrap();

    assert!(outcome.preflight_error.is_none(), "unexpected preflight error: {:?}", outcome.preflight_error);
    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    assert!(!outcome.canceled);
    assert_eq!(outcome.counters.total_blobs, 2);
    assert_eq!(outcome.counters.synced_blobs, 2);
    assert_eq!(outcome.counters.failed_blobs, 0);
}

#[tokio::test]
async fn test_multi_arch_index_copy_skips_blobs_already_on_target() {
    let source = MockServer::start().await;
    let target = MockServer::start().await;

    Mock::given(method("GET")).and(path("/v2/")).respond_with(ResponseTemplate::new(200)).mount(&source).await;
    Mock::given(method("GET"))
        .and(path("/v2/library/app/tags/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": ["2.0"] })))
        .mount(&source)
        .await;

    let index_json = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": AMD64_MANIFEST_DIGEST,
                "size": 4,
                "platform": { "architecture": "amd64", "os": "linux" },
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": ARM64_MANIFEST_DIGEST,
                "size": 4,
                "platform": { "architecture": "arm64", "os": "linux" },
            },
        ],
    });
    Mock::given(method("GET"))
        .and(path("/v2/library/app/manifests/2.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", INDEX_DIGEST)
                .insert_header("Content-Type", "application/vnd.oci.image.index.v1+json")
                .set_body_json(&index_json),
        )
        .mount(&source)
        .await;

    let amd64_manifest = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": { "mediaType": "application/vnd.oci.image.config.v1+json", "digest": AMD64_CONFIG_DIGEST, "size": 4 },
        "layers": [{ "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": AMD64_LAYER_DIGEST, "size": 8 }],
    });
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/app/manifests/{AMD64_MANIFEST_DIGEST}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", AMD64_MANIFEST_DIGEST)
                .insert_header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
                .set_body_json(&amd64_manifest),
        )
        .mount(&source)
        .await;

    // arm64 is excluded by the rule's architecture allow-list below and must never
    // be fetched as a child manifest.
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/app/manifests/{ARM64_MANIFEST_DIGEST}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&source)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/library/app/blobs/{AMD64_LAYER_DIGEST}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 8]))
        .mount(&source)
        .await;

    // --- target: project already exists, config blob already present (mirrors a
    // shared base image layer another rule already copied), layer blob missing ---
    Mock::given(method("GET")).and(path("/v2/")).respond_with(ResponseTemplate::new(200)).mount(&target).await;
    Mock::given(method("GET"))
        .and(path("/api/v2.0/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "name": "mirror" }])))
        .mount(&target)
        .await;

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/mirror/app/blobs/{AMD64_CONFIG_DIGEST}")))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "4"))
        .mount(&target)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/mirror/app/blobs/{AMD64_LAYER_DIGEST}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&target)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/mirror/app/blobs/uploads/"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/mirror/app/blobs/uploads/session"))
        .mount(&target)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v2/mirror/app/blobs/uploads/session"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", "/v2/mirror/app/blobs/uploads/session"))
        .mount(&target)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/mirror/app/blobs/uploads/session"))
        .respond_with(CommitResponder)
        .mount(&target)
        .await;

    Mock::given(method("PUT"))
        .and(path(format!("/v2/mirror/app/manifests/{AMD64_MANIFEST_DIGEST}")))
        .respond_with(ResponseTemplate::new(201).insert_header("Docker-Content-Digest", AMD64_MANIFEST_DIGEST))
        .mount(&target)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/mirror/app/manifests/2.0"))
        .respond_with(ResponseTemplate::new(201).insert_header("Docker-Content-Digest", INDEX_DIGEST))
        .mount(&target)
        .await;

    let rule = ReplicationRule::builder()
        .id("mirror-app".into())
        .name("mirror app".into())
        .source(RepositorySelector::builder().project("library".into()).repo("app".into()).build())
        .target(RepositorySelector::builder().project("mirror".into()).build())
        .architectures(vec!["amd64".into()])
        .build();

    let source_client = Arc::new(RegistryClient::new(RegistryEndpoint::new(source.uri())).unwrap());
    let target_client = Arc::new(RegistryClient::new(RegistryEndpoint::new(target.uri())).unwrap());
    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(64);
    let engine = ReplicationEngine::new(source_client, target_client, progress_tx);
    let drain = tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });

    let outcome = engine.run(&rule, "exec-2", 2, CancellationToken::new()).await.unwrap();
    drain.await.unwrap();

    assert!(outcome.preflight_error.is_none(), "unexpected preflight error: {:?}", outcome.preflight_error);
    assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
    // Only the amd64 child's two blobs are ever planned; the config blob was
    // already present so only the layer is actually transferred.
    assert_eq!(outcome.counters.total_blobs, 2);
    assert_eq!(outcome.counters.synced_blobs, 2);
    assert_eq!(outcome.counters.skipped_blobs, 1);
    assert_eq!(outcome.counters.failed_blobs, 0);
}
