//! OCI registry listing against a mock distribution API.

use deployer::registry::{ImageTagResolver, OciRegistry, Registry};
use deployer::DeployError;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_digest(server: &MockServer, tag: &str, digest: &str) {
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/acme/api/manifests/{tag}")))
        .respond_with(ResponseTemplate::new(200).insert_header("docker-content-digest", digest))
        .mount(server)
        .await;
}

async fn paged_registry() -> MockServer {
    let server = MockServer::start().await;
    // registered first so it wins over the unqualified first page
    Mock::given(method("GET"))
        .and(path("/v2/acme/api/tags/list"))
        .and(query_param("last", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "acme/api",
            "tags": ["a1b2c3d", "feature_x"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/acme/api/tags/list"))
        .and(header("authorization", "Bearer reg-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    r#"</v2/acme/api/tags/list?n=1000&last=main>; rel="next""#,
                )
                .set_body_json(json!({ "name": "acme/api", "tags": ["fea7001", "main"] })),
        )
        .mount(&server)
        .await;

    mount_digest(&server, "main", "sha256:aaa").await;
    mount_digest(&server, "a1b2c3d", "sha256:aaa").await;
    mount_digest(&server, "fea7001", "sha256:bbb").await;
    mount_digest(&server, "feature_x", "sha256:bbb").await;
    server
}

#[tokio::test]
async fn follows_pages_and_groups_by_digest() {
    let server = paged_registry().await;
    let registry = OciRegistry::new(&server.uri(), Some("reg-token".to_string())).unwrap();

    let groups = registry.list_images("acme/api").await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].digest, "sha256:bbb");
    assert_eq!(groups[0].tags, ["fea7001", "feature_x"]);
    assert_eq!(groups[1].tags, ["main", "a1b2c3d"]);
}

#[tokio::test]
async fn resolves_branch_to_commit_tag() {
    let server = paged_registry().await;
    let registry = OciRegistry::new(&server.uri(), Some("reg-token".to_string())).unwrap();
    let resolver = ImageTagResolver::new(Arc::new(registry));

    let tag = resolver
        .resolve("acme/api", "^{Branch}$", r"\b[0-9a-f]{5,40}\b", "feature/x", "staging")
        .await
        .unwrap();
    assert_eq!(tag, "fea7001");

    let missing = resolver
        .resolve("acme/api", "^{Branch}$", r"\b[0-9a-f]{5,40}\b", "develop", "staging")
        .await;
    assert!(matches!(missing, Err(DeployError::ImageTagNotFound)));
}

#[tokio::test]
async fn unauthorized_listing_is_a_registry_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/acme/api/tags/list"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let registry = OciRegistry::new(&server.uri(), None).unwrap();
    assert!(matches!(
        registry.list_images("acme/api").await,
        Err(DeployError::Registry(_))
    ));
}
