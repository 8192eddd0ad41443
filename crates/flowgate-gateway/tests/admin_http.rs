//! Admin lifecycle and traffic dispatch over the real axum router, driven
//! through `tower::ServiceExt` without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use flowgate_gateway::{
    admin, filters, DynamicMux, GatewayServer, GatewayServerConfig, PipelineController,
};
use flowgate_kernel::{ApiRegistry, FilterRegistry, Services};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    router: Router,
    mux: Arc<DynamicMux>,
    api: Arc<ApiRegistry>,
    controller: Arc<PipelineController>,
}

fn harness() -> Harness {
    let mut kinds = FilterRegistry::new();
    filters::register_builtin(&mut kinds).unwrap();

    let api = Arc::new(ApiRegistry::new());
    let services = Services::new(api.clone());
    let controller = PipelineController::new(kinds.seal(), services);
    admin::register(&controller, &api);

    let mux = DynamicMux::new(api.clone());
    let server = GatewayServer::new(GatewayServerConfig::new(), mux.clone(), api.clone());

    Harness {
        router: server.build_router(),
        mux,
        api,
        controller,
    }
}

impl Harness {
    /// Wait until the mux has rebuilt for every registry change so far.
    async fn settle(&self) {
        let target = self.api.version();
        for _ in 0..200 {
            if self.mux.router().version() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("mux never caught up to version {target}");
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: impl Into<Body>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>, Option<String>) {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body.into()).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let config_version = response
            .headers()
            .get("x-config-version")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, bytes.to_vec(), config_version)
    }
}

const SPEC: &str = "\
name: demo
flow:
  - filter: auth
    jumpIf: { invalid: END }
  - filter: respond
filters:
  - name: auth
    kind: Validator
    credentials: [sk-test]
  - name: respond
    kind: Mock
    code: 200
    body: 'hello [[filter.respond.req.headers.x-auth-principal]]'
";

#[tokio::test]
async fn pipeline_lifecycle_over_http() {
    let h = harness();
    h.settle().await;

    // Create.
    let (status, body, _) = h
        .request("POST", "/apis/v1/pipelines", SPEC, &[])
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));

    // List.
    let (status, body, _) = h.request("GET", "/apis/v1/pipelines", "", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("demo"));

    // Traffic with a valid credential renders the template.
    h.settle().await;
    let (status, body, config_version) = h
        .request(
            "GET",
            "/apis/v1/traffic/demo",
            "",
            &[("x-api-key", "sk-test")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello sk-test");
    assert!(config_version.is_some());

    // Traffic without a credential is cut off by the validator.
    let (status, _, _) = h.request("GET", "/apis/v1/traffic/demo", "", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Status aggregates both filters.
    let (status, body, _) = h
        .request("GET", "/apis/v1/pipelines/demo/status", "", &[])
        .await;
    assert_eq!(status, StatusCode::OK);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["health"], "ok");
    assert!(parsed["filters"]["auth"]["credentials"].is_number());
    assert!(parsed["filters"]["respond"]["served"].is_number());

    // Spec round-trips as YAML.
    let (status, body, _) = h
        .request("GET", "/apis/v1/pipelines/demo", "", &[])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("kind: Validator"));

    // Update swaps the mock body on the next request boundary.
    let updated = SPEC.replace("hello", "hi");
    let (status, _, _) = h
        .request("PUT", "/apis/v1/pipelines/demo", updated, &[])
        .await;
    assert_eq!(status, StatusCode::OK);

    h.settle().await;
    let (_, body, _) = h
        .request(
            "GET",
            "/apis/v1/traffic/demo",
            "",
            &[("x-api-key", "sk-test")],
        )
        .await;
    assert_eq!(body, b"hi sk-test");

    // Delete tears the route down.
    let (status, _, _) = h
        .request("DELETE", "/apis/v1/pipelines/demo", "", &[])
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    h.settle().await;
    let (status, _, _) = h.request("GET", "/apis/v1/traffic/demo", "", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_spec_is_rejected_with_the_flow_prefix() {
    let h = harness();
    h.settle().await;

    let backward = "\
name: bad
flow:
  - filter: a
  - filter: b
    jumpIf: { invalid: a }
filters:
  - name: a
    kind: Validator
  - name: b
    kind: Validator
";
    let (status, body, _) = h
        .request("POST", "/apis/v1/pipelines", backward, &[])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("flow:"));

    // Nothing was configured.
    let (_, body, _) = h.request("GET", "/apis/v1/pipelines", "", &[]).await;
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["pipelines"], serde_json::json!([]));
}

#[tokio::test]
async fn unknown_pipeline_routes_and_specs_return_404() {
    let h = harness();
    h.settle().await;

    let (status, _, _) = h
        .request("GET", "/apis/v1/pipelines/ghost/status", "", &[])
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = h.request("GET", "/apis/v1/traffic/ghost", "", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trailing_slashes_are_normalized() {
    let h = harness();
    h.settle().await;

    let (status, _, _) = h.request("GET", "/apis/v1/pipelines/", "", &[]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn filter_kinds_are_discoverable() {
    let h = harness();
    h.settle().await;

    let (status, body, _) = h.request("GET", "/apis/v1/filter-kinds", "", &[]).await;
    assert_eq!(status, StatusCode::OK);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let kinds: Vec<&str> = parsed["kinds"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|kind| kind["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["Mock", "RateLimit", "Validator"]);
}
