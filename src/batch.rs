use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::endpoint_registry::EndpointRegistry;
use crate::error::{ErrorCategory, ExecutionError, join_messages};
use crate::query_executor::{GraphQLGateway, GraphQLRequest};
use crate::ExecutionMode;

/// One operation of a batch. Unset `name` becomes `operation_{index}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchOperationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Overrides the batch-wide timeout for this operation.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl BatchOperationRequest {
    pub fn new(endpoint: impl Into<String>, query: impl Into<String>) -> Self {
        BatchOperationRequest {
            endpoint: endpoint.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("operation_{}", index))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub name: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "execution_time_ms", with = "duration_ms")]
    pub execution_time: Duration,
    /// Position of the operation in the submitted list.
    pub index: usize,
    pub endpoint: String,
    pub query: Option<String>,
    pub variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ExecutionError>,
}

impl BatchOperationResult {
    fn failure(
        index: usize,
        request: &BatchOperationRequest,
        error: ExecutionError,
        execution_time: Duration,
    ) -> Self {
        BatchOperationResult {
            name: request.label(index),
            success: false,
            data: None,
            error: Some(error.message.clone()),
            execution_time,
            index,
            endpoint: request.endpoint.clone(),
            query: Some(request.query.clone()),
            variables: request.variables.clone(),
            errors: vec![error],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Length of the submitted list, even when a sequential batch stopped early.
    pub total_operations: usize,
    pub successful_operations: usize,
    /// Failures among the operations that actually ran.
    pub failed_operations: usize,
    #[serde(rename = "total_execution_time_ms", with = "duration_ms")]
    pub total_execution_time: Duration,
    pub average_execution_time_ms: f64,
    pub execution_mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub continue_on_error: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchExecutionResponse {
    pub results: Vec<BatchOperationResult>,
    pub summary: BatchSummary,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl BatchExecutionResponse {
    /// A response for a batch that was refused before anything ran.
    pub fn rejected(
        total_operations: usize,
        mode: ExecutionMode,
        continue_on_error: bool,
        reason: String,
    ) -> Self {
        let now = Utc::now();
        BatchExecutionResponse {
            results: Vec::new(),
            summary: BatchSummary {
                total_operations,
                successful_operations: 0,
                failed_operations: 0,
                total_execution_time: Duration::ZERO,
                average_execution_time_ms: 0.0,
                execution_mode: mode,
                started_at: now,
                completed_at: now,
                continue_on_error,
            },
            errors: vec![reason],
            warnings: Vec::new(),
        }
    }
}

/// Runs lists of GraphQL operations against registered endpoints.
#[derive(Clone)]
pub struct BatchExecutor {
    registry: EndpointRegistry,
    gateway: Arc<dyn GraphQLGateway>,
}

impl BatchExecutor {
    pub fn new(registry: EndpointRegistry, gateway: Arc<dyn GraphQLGateway>) -> Self {
        BatchExecutor { registry, gateway }
    }

    /// Executes every operation and summarizes the outcome.
    ///
    /// Sequential mode runs in input order and, when `continue_on_error` is
    /// false, stops at the first failure; later operations are left out of
    /// the results. Parallel mode always runs every operation. `timeout`
    /// applies to each operation separately.
    pub async fn execute(
        &self,
        operations: Vec<BatchOperationRequest>,
        mode: ExecutionMode,
        continue_on_error: bool,
        timeout: Duration,
    ) -> BatchExecutionResponse {
        let total_operations = operations.len();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            operations = total_operations,
            mode = %mode,
            continue_on_error,
            "Executing batch"
        );

        let results = match mode {
            ExecutionMode::Parallel => self.run_parallel(operations, timeout).await,
            ExecutionMode::Sequential => {
                self.run_sequential(operations, continue_on_error, timeout)
                    .await
            }
        };

        let total_execution_time = clock.elapsed();
        let completed_at = Utc::now();
        let successful_operations = results.iter().filter(|r| r.success).count();
        let failed_operations = results.len() - successful_operations;
        let average_execution_time_ms = if results.is_empty() {
            0.0
        } else {
            results
                .iter()
                .map(|r| r.execution_time.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / results.len() as f64
        };

        let mut warnings = Vec::new();
        if results.len() < total_operations {
            warnings.push(format!(
                "Stopped after {} of {} operations because continue_on_error is false",
                results.len(),
                total_operations
            ));
        }

        info!(
            total = total_operations,
            succeeded = successful_operations,
            failed = failed_operations,
            elapsed_ms = total_execution_time.as_millis() as u64,
            "Batch completed"
        );

        BatchExecutionResponse {
            results,
            summary: BatchSummary {
                total_operations,
                successful_operations,
                failed_operations,
                total_execution_time,
                average_execution_time_ms,
                execution_mode: mode,
                started_at,
                completed_at,
                continue_on_error,
            },
            errors: Vec::new(),
            warnings,
        }
    }

    async fn run_sequential(
        &self,
        operations: Vec<BatchOperationRequest>,
        continue_on_error: bool,
        timeout: Duration,
    ) -> Vec<BatchOperationResult> {
        let mut results = Vec::with_capacity(operations.len());
        for (index, request) in operations.into_iter().enumerate() {
            let result = self.run_isolated(index, request, timeout).await;
            let failed = !result.success;
            results.push(result);
            if failed && !continue_on_error {
                debug!(index, "Stopping sequential batch after failure");
                break;
            }
        }
        results
    }

    async fn run_parallel(
        &self,
        operations: Vec<BatchOperationRequest>,
        timeout: Duration,
    ) -> Vec<BatchOperationResult> {
        let tasks = operations
            .into_iter()
            .enumerate()
            .map(|(index, request)| self.run_isolated(index, request, timeout));
        let mut results = join_all(tasks).await;
        results.sort_by_key(|r| r.index);
        results
    }

    /// Runs one operation on its own task so that a panic inside it becomes
    /// a failed result instead of tearing down the batch.
    async fn run_isolated(
        &self,
        index: usize,
        request: BatchOperationRequest,
        timeout: Duration,
    ) -> BatchOperationResult {
        let started = Instant::now();
        let executor = self.clone();
        let fallback = request.clone();
        let handle =
            tokio::spawn(async move { executor.execute_one(index, request, timeout).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(index, endpoint = %fallback.endpoint, error = %e, "Batch operation aborted");
                BatchOperationResult::failure(
                    index,
                    &fallback,
                    ExecutionError::unexpected(e),
                    started.elapsed(),
                )
            }
        }
    }

    async fn execute_one(
        &self,
        index: usize,
        request: BatchOperationRequest,
        default_timeout: Duration,
    ) -> BatchOperationResult {
        let started = Instant::now();

        let Some(endpoint) = self.registry.get(&request.endpoint).await else {
            warn!(index, endpoint = %request.endpoint, "Endpoint not found");
            let error = ExecutionError::new(
                ErrorCategory::Unexpected,
                format!("Endpoint not found: {}", request.endpoint),
            )
            .with_suggestions(&["Register the endpoint first", "Check the endpoint name"]);
            return BatchOperationResult::failure(index, &request, error, started.elapsed());
        };

        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        let graphql_request = GraphQLRequest::new(request.query.clone())
            .with_variables(request.variables.clone())
            .with_operation_name(request.operation_name.clone())
            .with_headers(endpoint.headers);

        let response = self
            .gateway
            .execute(&endpoint.url, &graphql_request, timeout)
            .await;
        let success = response.is_success();
        self.registry.record_access(&request.endpoint, success).await;

        BatchOperationResult {
            name: request.label(index),
            success,
            data: response.data,
            error: join_messages(&response.errors),
            execution_time: started.elapsed(),
            index,
            endpoint: request.endpoint,
            query: Some(request.query),
            variables: request.variables,
            errors: response.errors,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointInfo;
    use crate::testing::{FakeGateway, Reply};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(30);

    async fn setup(gateway: FakeGateway) -> (BatchExecutor, EndpointRegistry, Arc<FakeGateway>) {
        let registry = EndpointRegistry::new();
        registry
            .register(
                EndpointInfo::new("users", "http://users.test/graphql")
                    .with_header("Authorization", "Bearer abc"),
                None,
            )
            .await;
        registry
            .register(EndpointInfo::new("products", "http://products.test/graphql"), None)
            .await;
        let gateway = Arc::new(gateway);
        let executor = BatchExecutor::new(registry.clone(), gateway.clone());
        (executor, registry, gateway)
    }

    fn three_ops() -> Vec<BatchOperationRequest> {
        vec![
            BatchOperationRequest::new("users", "q0"),
            BatchOperationRequest::new("products", "q1"),
            BatchOperationRequest::new("users", "q2"),
        ]
    }

    #[tokio::test]
    async fn empty_batch_is_not_an_error() {
        let (executor, _, gateway) = setup(FakeGateway::new()).await;

        let response = executor
            .execute(Vec::new(), ExecutionMode::Parallel, false, TIMEOUT)
            .await;

        assert!(response.results.is_empty());
        assert!(response.errors.is_empty());
        assert_eq!(response.summary.total_operations, 0);
        assert_eq!(response.summary.successful_operations, 0);
        assert_eq!(response.summary.failed_operations, 0);
        assert_eq!(response.summary.average_execution_time_ms, 0.0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn parallel_results_follow_input_order() {
        let gateway = FakeGateway::new()
            .delay("q1", Duration::from_millis(150))
            .delay("q0", Duration::from_millis(20));
        let (executor, _, gateway) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Parallel, true, TIMEOUT)
            .await;

        assert_eq!(gateway.completion_order().last().map(String::as_str), Some("q1"));
        let indices: Vec<usize> = response.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let queries: Vec<&str> = response
            .results
            .iter()
            .map(|r| r.query.as_deref().unwrap())
            .collect();
        assert_eq!(queries, vec!["q0", "q1", "q2"]);
        assert_eq!(response.results[1].data, Some(json!({ "echo": "q1" })));
        assert_eq!(response.summary.execution_mode, ExecutionMode::Parallel);
    }

    #[tokio::test]
    async fn parallel_wall_time_is_not_the_sum_of_operations() {
        let gateway = FakeGateway::new()
            .delay("q0", Duration::from_millis(200))
            .delay("q1", Duration::from_millis(200))
            .delay("q2", Duration::from_millis(200));
        let (executor, _, _) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Parallel, true, TIMEOUT)
            .await;

        let summed: Duration = response.results.iter().map(|r| r.execution_time).sum();
        assert!(response.summary.total_execution_time < summed);
        assert!(response.summary.completed_at >= response.summary.started_at);
    }

    #[tokio::test]
    async fn sequential_stops_at_first_failure() {
        let gateway = FakeGateway::new().reply("q1", Reply::Fail(ErrorCategory::Http, "HTTP 500: boom"));
        let (executor, _, gateway) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Sequential, false, TIMEOUT)
            .await;

        assert_eq!(response.results.len(), 2);
        assert!(response.results[0].success);
        assert!(!response.results[1].success);
        assert_eq!(response.results[1].error.as_deref(), Some("HTTP 500: boom"));
        assert_eq!(response.summary.total_operations, 3);
        assert_eq!(response.summary.successful_operations, 1);
        assert_eq!(response.summary.failed_operations, 1);
        assert_eq!(response.warnings.len(), 1);
        let queried: Vec<String> = gateway.calls().into_iter().map(|c| c.query).collect();
        assert_eq!(queried, vec!["q0".to_string(), "q1".to_string()]);
    }

    #[tokio::test]
    async fn sequential_continues_when_asked() {
        let gateway = FakeGateway::new().reply("q1", Reply::Fail(ErrorCategory::Timeout, "slow"));
        let (executor, _, _) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Sequential, true, TIMEOUT)
            .await;

        assert_eq!(response.results.len(), 3);
        assert_eq!(response.summary.failed_operations, 1);
        assert_eq!(response.summary.successful_operations, 2);
        assert!(response.warnings.is_empty());
        assert_eq!(response.results[1].errors[0].category, ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn parallel_ignores_continue_on_error_for_scheduling() {
        let gateway = FakeGateway::new().reply("q0", Reply::Fail(ErrorCategory::Connection, "refused"));
        let (executor, _, gateway) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Parallel, false, TIMEOUT)
            .await;

        assert_eq!(response.results.len(), 3);
        assert_eq!(gateway.calls().len(), 3);
        assert_eq!(response.summary.failed_operations, 1);
        assert!(!response.summary.continue_on_error);
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_without_calling_gateway() {
        let (executor, registry, gateway) = setup(FakeGateway::new()).await;

        let response = executor
            .execute(
                vec![BatchOperationRequest::new("ghost", "{ a }")],
                ExecutionMode::Sequential,
                true,
                TIMEOUT,
            )
            .await;

        let result = &response.results[0];
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Endpoint not found: ghost"));
        assert_eq!(result.name, "operation_0");
        assert!(gateway.calls().is_empty());
        assert!(registry.get_endpoint_stats("ghost").await.is_none());
        for stats in registry.get_all_stats().await.values() {
            assert_eq!(stats.access_count, 0);
        }
    }

    #[tokio::test]
    async fn partial_graphql_results_keep_their_data() {
        let gateway = FakeGateway::new().reply(
            "q0",
            Reply::Partial(json!({ "user": null, "users": [] }), "user not found"),
        );
        let (executor, _, _) = setup(gateway).await;

        let response = executor
            .execute(
                vec![BatchOperationRequest::new("users", "q0").named("lookup")],
                ExecutionMode::Sequential,
                true,
                TIMEOUT,
            )
            .await;

        let result = &response.results[0];
        assert_eq!(result.name, "lookup");
        assert!(!result.success);
        assert_eq!(result.data, Some(json!({ "user": null, "users": [] })));
        assert_eq!(result.error.as_deref(), Some("user not found"));
    }

    #[tokio::test]
    async fn gateway_panic_becomes_failed_result() {
        let gateway = FakeGateway::new().reply("q1", Reply::Panic);
        let (executor, _, _) = setup(gateway).await;

        let response = executor
            .execute(three_ops(), ExecutionMode::Parallel, true, TIMEOUT)
            .await;

        assert_eq!(response.results.len(), 3);
        let failed = &response.results[1];
        assert!(!failed.success);
        assert_eq!(failed.index, 1);
        assert_eq!(failed.endpoint, "products");
        assert_eq!(failed.errors[0].category, ErrorCategory::Unexpected);
        assert!(response.results[0].success && response.results[2].success);
    }

    #[tokio::test]
    async fn every_completed_operation_is_counted() {
        let gateway = FakeGateway::new().reply("q2", Reply::Fail(ErrorCategory::GraphQL, "bad field"));
        let (executor, registry, _) = setup(gateway).await;

        executor
            .execute(three_ops(), ExecutionMode::Parallel, true, TIMEOUT)
            .await;

        let users = registry.get_endpoint_stats("users").await.unwrap();
        assert_eq!((users.access_count, users.success_count, users.error_count), (2, 1, 1));
        let products = registry.get_endpoint_stats("products").await.unwrap();
        assert_eq!((products.access_count, products.success_count), (1, 1));
    }

    #[tokio::test]
    async fn per_operation_timeout_and_headers_reach_gateway() {
        let (executor, _, gateway) = setup(FakeGateway::new()).await;

        executor
            .execute(
                vec![
                    BatchOperationRequest::new("users", "q0").with_timeout(5),
                    BatchOperationRequest::new("users", "q1"),
                ],
                ExecutionMode::Sequential,
                true,
                Duration::from_secs(12),
            )
            .await;

        let calls = gateway.calls();
        assert_eq!(calls[0].timeout, Duration::from_secs(5));
        assert_eq!(calls[1].timeout, Duration::from_secs(12));
        assert_eq!(calls[0].url, "http://users.test/graphql");
        assert_eq!(calls[0].headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
    }

    #[test]
    fn result_serializes_time_in_milliseconds() {
        let request = BatchOperationRequest::new("users", "{ a }");
        let result = BatchOperationResult::failure(
            3,
            &request,
            ExecutionError::new(ErrorCategory::Unexpected, "nope"),
            Duration::from_millis(1500),
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["execution_time_ms"], json!(1500.0));
        assert_eq!(value["name"], json!("operation_3"));
        assert_eq!(value["errors"][0]["category"], json!("Unexpected"));
    }
}
