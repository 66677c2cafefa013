//! Named tool calls with JSON arguments, routed to [`CombinedOperations`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::batch::BatchOperationRequest;
use crate::operations::CombinedOperations;
use crate::{EndpointInfo, ExecutionMode};

pub const TOOL_NAMES: &[&str] = &[
    "register_endpoint",
    "unregister_endpoint",
    "get_endpoint",
    "list_endpoints",
    "get_schema",
    "register_tool",
    "cleanup_stale_endpoints",
    "registry_summary",
    "endpoint_stats",
    "execute_query",
    "execute_batch",
    "analyze_schema_complexity",
    "compare_schemas",
];

/// Envelope returned for every tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub data: Value,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ToolResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => ToolResponse {
                success: true,
                data,
                errors: Vec::new(),
            },
            Err(e) => Self::error(format!("Failed to serialize result: {}", e)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResponse {
            success: false,
            data: Value::Null,
            errors: vec![message.into()],
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct RegisterEndpointArgs {
    name: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    allow_mutations: bool,
    #[serde(default)]
    tool_prefix: String,
    #[serde(default = "default_true")]
    introspect: bool,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
struct GetSchemaArgs {
    name: String,
    #[serde(default = "default_true")]
    use_cache: bool,
}

#[derive(Deserialize)]
struct RegisterToolArgs {
    tool_name: String,
    endpoint_name: String,
}

#[derive(Deserialize)]
struct CleanupArgs {
    max_age_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct ExecuteQueryArgs {
    endpoint: String,
    query: String,
    variables: Option<Value>,
    operation_name: Option<String>,
}

#[derive(Deserialize)]
struct ExecuteBatchArgs {
    operations: Vec<BatchOperationRequest>,
    #[serde(default)]
    execution_mode: String,
    #[serde(default = "default_true")]
    continue_on_error: bool,
    timeout_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct CompareArgs {
    endpoint_a: String,
    endpoint_b: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolResponse> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ToolResponse::error(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Dispatches tool calls by name.
#[derive(Clone)]
pub struct ToolRouter {
    ops: CombinedOperations,
    stale_after: Duration,
}

impl ToolRouter {
    pub fn new(ops: CombinedOperations, stale_after: Duration) -> Self {
        ToolRouter { ops, stale_after }
    }

    pub fn operations(&self) -> &CombinedOperations {
        &self.ops
    }

    pub async fn call(&self, tool: &str, args: Value) -> ToolResponse {
        debug!(tool, "Tool call");
        match self.route(tool, args).await {
            Ok(response) | Err(response) => response,
        }
    }

    async fn route(&self, tool: &str, args: Value) -> Result<ToolResponse, ToolResponse> {
        let registry = self.ops.registry();
        let response = match tool {
            "register_endpoint" => {
                let args: RegisterEndpointArgs = parse_args(tool, args)?;
                let info = EndpointInfo {
                    name: args.name,
                    url: args.url,
                    headers: args.headers,
                    allow_mutations: args.allow_mutations,
                    tool_prefix: args.tool_prefix,
                };
                match self.ops.register_endpoint(info, args.introspect).await {
                    Ok(report) => {
                        let mut response = ToolResponse::ok(&report);
                        response.errors = report.errors;
                        response
                    }
                    Err(e) => ToolResponse::error(e.to_string()),
                }
            }
            "unregister_endpoint" => {
                let args: NameArgs = parse_args(tool, args)?;
                if self.ops.unregister_endpoint(&args.name).await {
                    ToolResponse::ok(json!({ "unregistered": args.name }))
                } else {
                    ToolResponse::error(format!("Endpoint not found: {}", args.name))
                }
            }
            "get_endpoint" => {
                let args: NameArgs = parse_args(tool, args)?;
                match self.ops.get_endpoint(&args.name).await {
                    Some(info) => ToolResponse::ok(redacted(&info)),
                    None => ToolResponse::error(format!("Endpoint not found: {}", args.name)),
                }
            }
            "list_endpoints" => {
                let endpoints: Vec<Value> =
                    self.ops.list_endpoints().await.iter().map(redacted).collect();
                ToolResponse::ok(endpoints)
            }
            "get_schema" => {
                let args: GetSchemaArgs = parse_args(tool, args)?;
                match self.ops.get_schema(&args.name, args.use_cache).await {
                    Some(schema) => ToolResponse::ok(&schema),
                    None => ToolResponse::error(format!(
                        "Could not retrieve schema for {}",
                        args.name
                    )),
                }
            }
            "register_tool" => {
                let args: RegisterToolArgs = parse_args(tool, args)?;
                if registry.register_tool(&args.tool_name, &args.endpoint_name).await {
                    ToolResponse::ok(json!({
                        "tool_name": args.tool_name,
                        "endpoint_name": args.endpoint_name,
                    }))
                } else {
                    ToolResponse::error(format!("Endpoint not found: {}", args.endpoint_name))
                }
            }
            "cleanup_stale_endpoints" => {
                let args: CleanupArgs = parse_args(tool, args)?;
                let max_age = args
                    .max_age_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(self.stale_after);
                let removed = registry.cleanup_stale(max_age).await;
                ToolResponse::ok(json!({ "removed": removed }))
            }
            "registry_summary" => ToolResponse::ok(registry.summary().await),
            "endpoint_stats" => {
                let args: NameArgs = parse_args(tool, args)?;
                match registry.get_endpoint_stats(&args.name).await {
                    Some(stats) => ToolResponse::ok(&stats),
                    None => ToolResponse::error(format!("Endpoint not found: {}", args.name)),
                }
            }
            "execute_query" => {
                let args: ExecuteQueryArgs = parse_args(tool, args)?;
                let response = self
                    .ops
                    .execute_query(&args.endpoint, &args.query, args.variables, args.operation_name)
                    .await;
                let errors = response.errors.iter().map(|e| e.message.clone()).collect();
                ToolResponse {
                    success: response.is_success(),
                    data: serde_json::to_value(&response).unwrap_or(Value::Null),
                    errors,
                }
            }
            "execute_batch" => {
                let args: ExecuteBatchArgs = parse_args(tool, args)?;
                let response = self
                    .ops
                    .execute_batch(
                        args.operations,
                        ExecutionMode::parse_lenient(&args.execution_mode),
                        args.continue_on_error,
                        args.timeout_seconds.map(Duration::from_secs),
                    )
                    .await;
                let mut envelope = ToolResponse::ok(&response);
                envelope.success = response.errors.is_empty();
                envelope.errors = response.errors.clone();
                envelope
            }
            "analyze_schema_complexity" => {
                let args: NameArgs = parse_args(tool, args)?;
                match self.ops.analyze_schema_complexity(&args.name).await {
                    Some(report) => ToolResponse::ok(&report),
                    None => ToolResponse::error("Could not retrieve schema"),
                }
            }
            "compare_schemas" => {
                let args: CompareArgs = parse_args(tool, args)?;
                match self.ops.compare_schemas(&args.endpoint_a, &args.endpoint_b).await {
                    Ok(comparison) => ToolResponse::ok(&comparison),
                    Err(unavailable) => ToolResponse::error(unavailable.error.clone())
                        .with_data(serde_json::to_value(&unavailable).unwrap_or(Value::Null)),
                }
            }
            _ => {
                warn!(tool, "Unknown tool");
                ToolResponse::error(format!("Unknown tool: {}", tool))
            }
        };
        Ok(response)
    }
}

/// Endpoint view with header values masked; they may carry credentials.
fn redacted(info: &EndpointInfo) -> Value {
    let headers: HashMap<&str, &str> = info
        .headers
        .keys()
        .map(|k| (k.as_str(), "***"))
        .collect();
    json!({
        "name": info.name,
        "url": info.url,
        "headers": headers,
        "allow_mutations": info.allow_mutations,
        "tool_prefix": info.tool_prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint_registry::EndpointRegistry;
    use crate::operations::OperationSettings;
    use crate::schema::tests::sample_introspection;
    use crate::testing::{FakeGateway, Reply};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn router(gateway: FakeGateway) -> ToolRouter {
        let ops = CombinedOperations::new(
            EndpointRegistry::new(),
            Arc::new(gateway),
            OperationSettings::default(),
        );
        ToolRouter::new(ops, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn register_then_list_masks_headers() {
        let router = router(FakeGateway::new().introspection(sample_introspection()));

        let registered = router
            .call(
                "register_endpoint",
                json!({
                    "name": "users",
                    "url": "http://users.test/graphql",
                    "headers": { "Authorization": "Bearer secret" }
                }),
            )
            .await;
        assert!(registered.success);
        assert_eq!(registered.data["tools"], json!(["users_user", "users_users"]));

        let listed = router.call("list_endpoints", Value::Null).await;
        assert_eq!(listed.data[0]["headers"]["Authorization"], json!("***"));
        assert!(!listed.data.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn bad_arguments_are_reported() {
        let router = router(FakeGateway::new());
        let response = router.call("get_endpoint", json!({ "nom": "x" })).await;
        assert!(!response.success);
        assert!(response.errors[0].starts_with("Invalid arguments for get_endpoint"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let router = router(FakeGateway::new());
        let response = router.call("drop_tables", json!({})).await;
        assert_eq!(response.errors, vec!["Unknown tool: drop_tables".to_string()]);
    }

    #[tokio::test]
    async fn batch_defaults_to_sequential_and_continues() {
        let gateway = FakeGateway::new().reply("q0", Reply::Fail(crate::ErrorCategory::Http, "HTTP 502"));
        let router = router(gateway);
        router
            .call("register_endpoint", json!({ "name": "users", "url": "http://u", "introspect": false }))
            .await;

        let response = router
            .call(
                "execute_batch",
                json!({
                    "operations": [
                        { "endpoint": "users", "query": "q0" },
                        { "endpoint": "users", "query": "q1", "name": "second" }
                    ],
                    "execution_mode": "warp-speed"
                }),
            )
            .await;

        assert!(response.success);
        assert_eq!(response.data["summary"]["execution_mode"], json!("sequential"));
        assert_eq!(response.data["summary"]["failed_operations"], json!(1));
        assert_eq!(response.data["results"][1]["name"], json!("second"));
    }

    #[tokio::test]
    async fn cleanup_uses_configured_age_by_default() {
        let router = router(FakeGateway::new());
        router
            .call("register_endpoint", json!({ "name": "users", "url": "http://u", "introspect": false }))
            .await;

        let response = router.call("cleanup_stale_endpoints", json!({})).await;
        assert_eq!(response.data, json!({ "removed": 0 }));

        let summary = router.call("registry_summary", json!({})).await;
        assert_eq!(summary.data["total_endpoints"], json!(1));
    }

    #[tokio::test]
    async fn every_listed_tool_is_routed() {
        let router = router(FakeGateway::new());
        for tool in TOOL_NAMES {
            let response = router.call(tool, json!({})).await;
            assert!(
                !response.errors.iter().any(|e| e.starts_with("Unknown tool")),
                "{} is not routed",
                tool
            );
        }
    }
}
