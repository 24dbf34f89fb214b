//! CI trigger and function invoker against mock HTTP endpoints.

use deployer::compute::{FunctionInvoker, HttpFunctionInvoker};
use deployer::model::{DeployModel, TriggerConfig, TriggerModel};
use deployer::{CatalogDocument, DeployError, DeployOption, DeployStatus, Project};
use wiremock::matchers::{basic_auth, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn project() -> Project {
    CatalogDocument::parse(
        r"
projects:
  - id: api
    kind: trigger
    triggerJob: api-deploy
    phases:
      - name: production
",
    )
    .unwrap()
    .projects
    .remove(0)
}

fn trigger(server: &MockServer) -> TriggerModel {
    TriggerModel::new(TriggerConfig {
        base_url: server.uri(),
        user: "deployer".to_string(),
        user_token: "user-token".to_string(),
        job_token: "job-token".to_string(),
    })
}

fn option() -> DeployOption {
    DeployOption {
        branch: "release/1.2".to_string(),
        ..DeployOption::default()
    }
}

#[tokio::test]
async fn trigger_posts_build_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job/api-deploy/buildWithParameters"))
        .and(basic_auth("deployer", "user-token"))
        .and(query_param("token", "job-token"))
        .and(query_param("ENV", "production"))
        .and(query_param("BRANCH", "release/1.2"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let output = trigger(&server)
        .deploy(&project(), "production", &option())
        .await
        .unwrap();
    assert_eq!(output.status, DeployStatus::Success);
    assert!(output.message.contains("release/1.2"));
}

#[tokio::test]
async fn trigger_requires_created_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job/api-deploy/buildWithParameters"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = trigger(&server)
        .deploy(&project(), "production", &option())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::TriggerFailed { status: 200 }));
}

#[tokio::test]
async fn invoker_reports_function_error_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/migrate/invocations"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"tag":"a1b2c3d"}"#))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-function-error", "Unhandled")
                .set_body_string(r#"{"errorMessage":"boom"}"#),
        )
        .mount(&server)
        .await;

    let invocation = HttpFunctionInvoker::new(&server.uri())
        .invoke("migrate", r#"{"tag":"a1b2c3d"}"#)
        .await
        .unwrap();
    assert_eq!(invocation.status_code, 200);
    assert_eq!(invocation.function_error.as_deref(), Some("Unhandled"));
    assert!(invocation.payload.contains("boom"));
}

#[tokio::test]
async fn invoker_success_has_no_function_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/migrate/invocations"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let invocation = HttpFunctionInvoker::new(&server.uri())
        .invoke("migrate", "{}")
        .await
        .unwrap();
    assert_eq!(invocation.function_error, None);
    assert_eq!(invocation.payload, "ok");
}
