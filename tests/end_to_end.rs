mod common;

use gqlhub::{
    BatchOperationRequest, CombinedOperations, EndpointInfo, EndpointRegistry, ErrorCategory,
    ExecutionMode, HttpGateway, OperationSettings, ToolRouter,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service() -> CombinedOperations {
    CombinedOperations::new(
        EndpointRegistry::new(),
        Arc::new(HttpGateway::new()),
        OperationSettings {
            default_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    )
}

async fn answer(server: &MockServer, query: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "query": query })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn register_introspect_and_query() {
    let server = common::introspectable_server().await;
    answer(&server, "{ topProducts { upc } }", json!({ "data": { "topProducts": [] } })).await;
    let ops = service();

    let report = ops
        .register_endpoint(EndpointInfo::new("products", server.uri()).with_tool_prefix("shop"), true)
        .await
        .unwrap();

    assert!(report.schema_cached);
    assert_eq!(report.tools, vec!["shop_product".to_string(), "shop_topProducts".to_string()]);

    let response = ops
        .execute_query("products", "{ topProducts { upc } }", None, None)
        .await;
    assert!(response.is_success());

    let stats = ops.registry().get_endpoint_stats("products").await.unwrap();
    assert_eq!((stats.access_count, stats.success_count, stats.error_count), (1, 1, 0));
    assert_eq!(stats.tool_count, 2);

    let complexity = ops.analyze_schema_complexity("products").await.unwrap();
    assert_eq!(complexity.total_types, 5);
    assert_eq!(complexity.total_operations, 3);
}

#[tokio::test]
async fn mixed_batch_across_endpoints() {
    let healthy = MockServer::start().await;
    answer(&healthy, "{ topProducts { upc } }", json!({ "data": { "topProducts": [{ "upc": "1" }] } })).await;
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let ops = service();
    ops.register_endpoint(EndpointInfo::new("healthy", healthy.uri()), false)
        .await
        .unwrap();
    ops.register_endpoint(EndpointInfo::new("broken", broken.uri()), false)
        .await
        .unwrap();

    let operations = vec![
        BatchOperationRequest::new("healthy", "{ topProducts { upc } }"),
        BatchOperationRequest::new("broken", "{ topProducts { upc } }"),
        BatchOperationRequest::new("ghost", "{ topProducts { upc } }"),
        BatchOperationRequest::new("healthy", "{ topProducts { upc } }"),
    ];
    let response = ops
        .execute_batch(operations, ExecutionMode::Parallel, false, None)
        .await;

    let outcomes: Vec<(usize, bool)> = response.results.iter().map(|r| (r.index, r.success)).collect();
    assert_eq!(outcomes, vec![(0, true), (1, false), (2, false), (3, true)]);
    assert_eq!(response.results[1].error.as_deref(), Some("HTTP 500: Internal Server Error"));
    assert_eq!(response.results[2].error.as_deref(), Some("Endpoint not found: ghost"));
    assert_eq!(response.summary.successful_operations, 2);
    assert_eq!(response.summary.failed_operations, 2);

    let broken_stats = ops.registry().get_endpoint_stats("broken").await.unwrap();
    assert_eq!((broken_stats.access_count, broken_stats.error_count), (1, 1));
}

#[tokio::test]
async fn sequential_batch_stops_on_transport_failure() {
    let healthy = MockServer::start().await;
    answer(&healthy, "{ a }", json!({ "data": { "a": 1 } })).await;
    let ops = service();
    ops.register_endpoint(EndpointInfo::new("healthy", healthy.uri()), false)
        .await
        .unwrap();
    ops.register_endpoint(EndpointInfo::new("offline", common::closed_port_url()), false)
        .await
        .unwrap();

    let response = ops
        .execute_batch(
            vec![
                BatchOperationRequest::new("healthy", "{ a }"),
                BatchOperationRequest::new("offline", "{ a }"),
                BatchOperationRequest::new("healthy", "{ a }"),
            ],
            ExecutionMode::Sequential,
            false,
            None,
        )
        .await;

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.summary.total_operations, 3);
    assert_eq!(response.results[1].errors[0].category, ErrorCategory::Connection);
}

#[tokio::test]
async fn tool_router_round_trip() {
    let server = common::introspectable_server().await;
    let router = ToolRouter::new(service(), Duration::from_secs(3600));

    let registered = router
        .call("register_endpoint", json!({ "name": "products", "url": server.uri() }))
        .await;
    assert!(registered.success);

    let comparison = router
        .call("compare_schemas", json!({ "endpoint_a": "products", "endpoint_b": "products" }))
        .await;
    assert_eq!(comparison.data["similarity_score"], json!(100.0));
    assert_eq!(comparison.data["are_compatible"], json!(true));

    let unregistered = router
        .call("unregister_endpoint", json!({ "name": "products" }))
        .await;
    assert!(unregistered.success);
    let summary = router.call("registry_summary", json!({})).await;
    assert_eq!(summary.data["total_endpoints"], json!(0));
    assert_eq!(summary.data["total_tools"], json!(0));
}
