use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchExecutionResponse, BatchExecutor, BatchOperationRequest};
use crate::endpoint_registry::EndpointRegistry;
use crate::error::{ErrorCategory, ExecutionError, HubError, HubResult, join_messages};
use crate::query_executor::{ExecutionMetadata, GatewayResponse, GraphQLGateway, GraphQLRequest};
use crate::query_inspector::is_mutation;
use crate::schema::{SchemaInfo, generate_tool_names, parse_introspection};
use crate::{EndpointInfo, ExecutionMode};

/// Limits applied by [`CombinedOperations`].
#[derive(Clone, Debug)]
pub struct OperationSettings {
    pub default_timeout: Duration,
    pub max_batch_size: usize,
    pub parallel_batch_enabled: bool,
}

impl Default for OperationSettings {
    fn default() -> Self {
        OperationSettings {
            default_timeout: Duration::from_secs(30),
            max_batch_size: 10,
            parallel_batch_enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RegistrationReport {
    pub endpoint: String,
    pub tools: Vec<String>,
    pub schema_cached: bool,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComplexityReport {
    pub endpoint_name: String,
    pub total_types: usize,
    pub total_fields: usize,
    pub total_operations: usize,
    pub complexity_score: usize,
    pub complexity_rating: &'static str,
    pub analysis_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchemaComparison {
    pub endpoint_a: String,
    pub endpoint_b: String,
    pub total_types_a: usize,
    pub total_types_b: usize,
    pub common_types: usize,
    pub unique_to_a: usize,
    pub unique_to_b: usize,
    pub similarity_score: f64,
    pub are_compatible: bool,
    pub comparison_timestamp: DateTime<Utc>,
}

/// Returned by [`CombinedOperations::compare_schemas`] when a side has no schema.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnavailableSchemas {
    pub error: String,
    pub endpoint_a_available: bool,
    pub endpoint_b_available: bool,
}

pub fn complexity_rating(score: usize) -> &'static str {
    match score {
        0..20 => "Simple",
        20..50 => "Moderate",
        50..80 => "Complex",
        _ => "Very Complex",
    }
}

/// Share of common types as a percentage rounded to 2 decimals, and whether
/// the unrounded share exceeds 70%.
fn similarity(common: usize, largest: usize) -> (f64, bool) {
    if largest == 0 {
        return (0.0, false);
    }
    let raw = common as f64 / largest as f64 * 100.0;
    ((raw * 100.0).round() / 100.0, raw > 70.0)
}

/// Higher-level operations built from the registry and the gateway.
#[derive(Clone)]
pub struct CombinedOperations {
    registry: EndpointRegistry,
    gateway: Arc<dyn GraphQLGateway>,
    batch: BatchExecutor,
    settings: OperationSettings,
}

impl CombinedOperations {
    pub fn new(
        registry: EndpointRegistry,
        gateway: Arc<dyn GraphQLGateway>,
        settings: OperationSettings,
    ) -> Self {
        let batch = BatchExecutor::new(registry.clone(), gateway.clone());
        CombinedOperations {
            registry,
            gateway,
            batch,
            settings,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OperationSettings {
        &self.settings
    }

    /// Registers `info` and, when asked, introspects it to cache a schema and
    /// associate the generated tools. Introspection failures are reported,
    /// not raised; the endpoint stays registered.
    pub async fn register_endpoint(
        &self,
        info: EndpointInfo,
        introspect: bool,
    ) -> HubResult<RegistrationReport> {
        info.validate()?;
        let mut report = RegistrationReport {
            endpoint: info.name.clone(),
            ..Default::default()
        };
        if !self.registry.register(info.clone(), None).await {
            return Err(HubError::InvalidEndpoint(format!(
                "endpoint {} could not be registered",
                info.name
            )));
        }
        if !introspect {
            return Ok(report);
        }

        let schema = match self.fetch_schema(&info).await {
            Ok(schema) => schema,
            Err(message) => {
                warn!(endpoint = %info.name, error = %message, "Introspection failed during registration");
                report.errors.push(message);
                return Ok(report);
            }
        };

        let tools = generate_tool_names(&info, &schema);
        report.schema_cached = self.registry.update_schema(&info.name, schema).await;
        // Tools from an earlier registration that the new schema or
        // permissions no longer produce are detached.
        for stale in self.registry.get_tools_for_endpoint(&info.name).await {
            if !tools.contains(&stale) {
                self.registry.remove_tool(&stale).await;
            }
        }
        for tool in tools {
            if self.registry.register_tool(&tool, &info.name).await {
                report.tools.push(tool);
            }
        }
        info!(
            endpoint = %info.name,
            tools = report.tools.len(),
            "Endpoint introspected"
        );
        Ok(report)
    }

    pub async fn unregister_endpoint(&self, name: &str) -> bool {
        self.registry.unregister(name).await
    }

    pub async fn get_endpoint(&self, name: &str) -> Option<EndpointInfo> {
        self.registry.get(name).await
    }

    /// All endpoints, ordered by name.
    pub async fn list_endpoints(&self) -> Vec<EndpointInfo> {
        let mut endpoints: Vec<EndpointInfo> =
            self.registry.get_all().await.into_values().collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        endpoints
    }

    /// Returns the cached schema or introspects the endpoint.
    ///
    /// A freshly fetched schema is cached only when `use_cache` is set.
    pub async fn get_schema(&self, name: &str, use_cache: bool) -> Option<SchemaInfo> {
        if use_cache {
            if let Some(schema) = self.registry.get_schema(name).await {
                debug!(endpoint = %name, "Schema cache hit");
                return Some(schema);
            }
        }

        let Some(endpoint) = self.registry.get(name).await else {
            warn!(endpoint = %name, "Endpoint not found");
            return None;
        };

        match self.fetch_schema(&endpoint).await {
            Ok(schema) => {
                if use_cache {
                    self.registry.update_schema(name, schema.clone()).await;
                }
                Some(schema)
            }
            Err(message) => {
                error!(endpoint = %name, error = %message, "Failed to get schema");
                None
            }
        }
    }

    async fn fetch_schema(&self, endpoint: &EndpointInfo) -> Result<SchemaInfo, String> {
        let response = self
            .gateway
            .introspect(&endpoint.url, &endpoint.headers, self.settings.default_timeout)
            .await;
        if let Some(message) = join_messages(&response.errors) {
            return Err(message);
        }
        let data = response
            .data
            .ok_or_else(|| "Introspection returned no data".to_string())?;
        parse_introspection(&data).map_err(|e| e.to_string())
    }

    /// Runs one operation against a registered endpoint.
    ///
    /// Mutations are refused without a network call unless the endpoint
    /// allows them.
    pub async fn execute_query(
        &self,
        endpoint_name: &str,
        query: &str,
        variables: Option<Value>,
        operation_name: Option<String>,
    ) -> GatewayResponse {
        let metadata = ExecutionMetadata::start(operation_name.clone());
        let Some(endpoint) = self.registry.get(endpoint_name).await else {
            warn!(endpoint = %endpoint_name, "Endpoint not found");
            return GatewayResponse::failed(
                ExecutionError::new(
                    ErrorCategory::Unexpected,
                    format!("Endpoint not found: {}", endpoint_name),
                ),
                metadata,
            );
        };

        if !endpoint.allow_mutations && is_mutation(query, operation_name.as_deref()) {
            warn!(endpoint = %endpoint_name, "Rejected mutation");
            return GatewayResponse::failed(
                ExecutionError::new(
                    ErrorCategory::GraphQL,
                    format!("Mutations are not allowed on endpoint {}", endpoint_name),
                )
                .with_suggestions(&[
                    "Register the endpoint with allow_mutations enabled",
                    "Use a query operation instead",
                ]),
                metadata,
            );
        }

        let request = GraphQLRequest::new(query)
            .with_variables(variables)
            .with_operation_name(operation_name)
            .with_headers(endpoint.headers);
        let response = self
            .gateway
            .execute(&endpoint.url, &request, self.settings.default_timeout)
            .await;
        self.registry
            .record_access(endpoint_name, response.is_success())
            .await;
        response
    }

    pub async fn analyze_schema_complexity(&self, name: &str) -> Option<ComplexityReport> {
        let schema = self.get_schema(name, true).await?;
        let total_types = schema.types.len();
        let total_fields = schema.total_fields();
        let total_operations = schema.total_operations();
        let complexity_score =
            (total_types * 2 + total_fields / 10 + total_operations * 3).min(100);

        Some(ComplexityReport {
            endpoint_name: name.to_string(),
            total_types,
            total_fields,
            total_operations,
            complexity_score,
            complexity_rating: complexity_rating(complexity_score),
            analysis_timestamp: Utc::now(),
        })
    }

    /// Compares the type names of two endpoints' schemas.
    pub async fn compare_schemas(
        &self,
        endpoint_a: &str,
        endpoint_b: &str,
    ) -> Result<SchemaComparison, UnavailableSchemas> {
        let schema_a = self.get_schema(endpoint_a, true).await;
        let schema_b = self.get_schema(endpoint_b, true).await;
        let (Some(schema_a), Some(schema_b)) = (&schema_a, &schema_b) else {
            return Err(UnavailableSchemas {
                error: "Could not retrieve schemas for comparison".to_string(),
                endpoint_a_available: schema_a.is_some(),
                endpoint_b_available: schema_b.is_some(),
            });
        };

        let types_a = schema_a.type_names();
        let types_b = schema_b.type_names();
        let common_types = types_a.intersection(&types_b).count();
        let (similarity_score, are_compatible) =
            similarity(common_types, types_a.len().max(types_b.len()));

        Ok(SchemaComparison {
            endpoint_a: endpoint_a.to_string(),
            endpoint_b: endpoint_b.to_string(),
            total_types_a: types_a.len(),
            total_types_b: types_b.len(),
            common_types,
            unique_to_a: types_a.len() - common_types,
            unique_to_b: types_b.len() - common_types,
            similarity_score,
            are_compatible,
            comparison_timestamp: Utc::now(),
        })
    }

    /// Runs a batch within the configured limits. `timeout` defaults to the
    /// configured per-operation timeout.
    pub async fn execute_batch(
        &self,
        operations: Vec<BatchOperationRequest>,
        mode: ExecutionMode,
        continue_on_error: bool,
        timeout: Option<Duration>,
    ) -> BatchExecutionResponse {
        if operations.len() > self.settings.max_batch_size {
            warn!(
                operations = operations.len(),
                limit = self.settings.max_batch_size,
                "Rejected oversized batch"
            );
            return BatchExecutionResponse::rejected(
                operations.len(),
                mode,
                continue_on_error,
                format!(
                    "Batch size {} exceeds the maximum of {}",
                    operations.len(),
                    self.settings.max_batch_size
                ),
            );
        }

        let mut warnings = Vec::new();
        let mode = if mode == ExecutionMode::Parallel && !self.settings.parallel_batch_enabled {
            warnings.push("Parallel execution is disabled; running sequentially".to_string());
            ExecutionMode::Sequential
        } else {
            mode
        };

        let timeout = timeout.unwrap_or(self.settings.default_timeout);
        let mut response = self
            .batch
            .execute(operations, mode, continue_on_error, timeout)
            .await;
        warnings.append(&mut response.warnings);
        response.warnings = warnings;
        response
    }
}
