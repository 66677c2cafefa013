pub mod batch;
pub mod config;
pub mod endpoint_registry;
pub mod error;
pub mod operations;
pub mod query_executor;
pub mod query_inspector;
pub mod schema;
pub mod tools;

#[cfg(test)]
mod testing;

pub use batch::{
    BatchExecutionResponse, BatchExecutor, BatchOperationRequest, BatchOperationResult, BatchSummary,
};
pub use config::{Config, LogFormat};
pub use endpoint_registry::{EndpointRegistry, EndpointStats, RegistrySummary};
pub use error::{ErrorCategory, ExecutionError, HubError, HubResult};
pub use operations::{CombinedOperations, OperationSettings};
pub use query_executor::{GatewayResponse, GraphQLGateway, HttpGateway};
pub use schema::SchemaInfo;
pub use tools::{ToolResponse, ToolRouter};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Configuration of one registered GraphQL endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub allow_mutations: bool,
    #[serde(default)]
    pub tool_prefix: String,
}

impl EndpointInfo {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        EndpointInfo {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_mutations(mut self, allow: bool) -> Self {
        self.allow_mutations = allow;
        self
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = prefix.into();
        self
    }

    /// Prefix used for generated tool names; falls back to the endpoint name.
    pub fn effective_tool_prefix(&self) -> &str {
        if self.tool_prefix.is_empty() {
            &self.name
        } else {
            &self.tool_prefix
        }
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::InvalidEndpoint(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(HubError::InvalidEndpoint(format!(
                "endpoint {} has an empty url",
                self.name
            )));
        }
        Ok(())
    }
}

/// Batch dispatch policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionMode {
    /// Parses a mode name; anything unrecognized is sequential.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "parallel" => ExecutionMode::Parallel,
            _ => ExecutionMode::Sequential,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}
