use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::EndpointInfo;
use crate::schema::SchemaInfo;

/// Usage counters for one endpoint.
///
/// `access_count == success_count + error_count` always holds; the only
/// writer is [`EndpointRegistry::record_access`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub registered_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub tool_count: usize,
    pub schema_version: String,
    pub last_introspection: Option<DateTime<Utc>>,
}

impl EndpointStats {
    fn new(registered_at: DateTime<Utc>, schema_version: String) -> Self {
        EndpointStats {
            registered_at,
            last_accessed: None,
            access_count: 0,
            success_count: 0,
            error_count: 0,
            tool_count: 0,
            schema_version,
            last_introspection: None,
        }
    }

    fn record(&mut self, success: bool, at: DateTime<Utc>) {
        self.last_accessed = Some(at);
        self.access_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    /// Last access time, or registration time if never accessed.
    fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.registered_at)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total_endpoints: usize,
    pub total_tools: usize,
    pub endpoints_with_schema: usize,
    pub last_registry_update: Option<DateTime<Utc>>,
}

/// Tool name <-> endpoint name index. Both maps only change together.
#[derive(Debug, Default)]
struct ToolIndex {
    tool_to_endpoint: HashMap<String, String>,
    endpoint_to_tools: HashMap<String, BTreeSet<String>>,
}

impl ToolIndex {
    /// Points `tool` at `endpoint`, detaching it from any previous endpoint.
    /// Returns the endpoint it was detached from, if different.
    fn associate(&mut self, tool: &str, endpoint: &str) -> Option<String> {
        let previous = self
            .tool_to_endpoint
            .insert(tool.to_string(), endpoint.to_string())
            .filter(|prev| prev != endpoint);
        if let Some(prev) = &previous {
            self.detach(prev, tool);
        }
        self.endpoint_to_tools
            .entry(endpoint.to_string())
            .or_default()
            .insert(tool.to_string());
        previous
    }

    /// Removes one tool from both directions, returning its endpoint.
    fn remove_tool(&mut self, tool: &str) -> Option<String> {
        let endpoint = self.tool_to_endpoint.remove(tool)?;
        self.detach(&endpoint, tool);
        Some(endpoint)
    }

    /// Removes every tool of `endpoint`, returning their names.
    fn remove_endpoint(&mut self, endpoint: &str) -> Vec<String> {
        let tools = self.endpoint_to_tools.remove(endpoint).unwrap_or_default();
        for tool in &tools {
            self.tool_to_endpoint.remove(tool);
        }
        tools.into_iter().collect()
    }

    fn detach(&mut self, endpoint: &str, tool: &str) {
        if let Some(tools) = self.endpoint_to_tools.get_mut(endpoint) {
            tools.remove(tool);
        }
    }

    fn tool_count(&self, endpoint: &str) -> usize {
        self.endpoint_to_tools.get(endpoint).map_or(0, BTreeSet::len)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    endpoints: HashMap<String, EndpointInfo>,
    schemas: HashMap<String, SchemaInfo>,
    stats: HashMap<String, EndpointStats>,
    last_updated: HashMap<String, DateTime<Utc>>,
    tools: ToolIndex,
}

impl RegistryState {
    fn refresh_tool_count(&mut self, endpoint: &str) {
        let count = self.tools.tool_count(endpoint);
        if let Some(stats) = self.stats.get_mut(endpoint) {
            stats.tool_count = count;
        }
    }

    fn remove_endpoint(&mut self, name: &str) -> bool {
        if self.endpoints.remove(name).is_none() {
            return false;
        }
        let removed_tools = self.tools.remove_endpoint(name);
        self.schemas.remove(name);
        self.stats.remove(name);
        self.last_updated.remove(name);
        debug!(endpoint = name, tools = removed_tools.len(), "Removed endpoint tools");
        true
    }
}

/// Process-wide registry of GraphQL endpoints, their cached schemas, usage
/// statistics and tool associations.
///
/// Cloning yields another handle to the same registry. Every operation takes
/// the single internal lock for a short in-memory critical section only.
#[derive(Clone)]
pub struct EndpointRegistry {
    state: Arc<RwLock<RegistryState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        info!("Endpoint registry initialized");
        EndpointRegistry {
            state: Arc::new(RwLock::new(RegistryState::default())),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    /// Inserts or replaces the endpoint keyed by `info.name`, resetting its
    /// statistics. A cached schema survives unless `schema` replaces it.
    /// Returns false when the record is unusable.
    pub async fn register(&self, info: EndpointInfo, schema: Option<SchemaInfo>) -> bool {
        if let Err(e) = info.validate() {
            warn!(error = %e, "Rejected endpoint registration");
            return false;
        }

        let now = self.now();
        let name = info.name.clone();
        let url = info.url.clone();

        let mut state = self.state.write().await;
        // Without a new schema the cached one stays until introspection replaces it.
        if let Some(schema) = schema {
            state.schemas.insert(name.clone(), schema);
        }
        let schema_version = state
            .schemas
            .get(&name)
            .map(|s| s.version.clone())
            .unwrap_or_default();
        state.endpoints.insert(name.clone(), info);
        state
            .stats
            .insert(name.clone(), EndpointStats::new(now, schema_version));
        state.last_updated.insert(name.clone(), now);
        // Re-registration keeps tools already associated with this name.
        state.refresh_tool_count(&name);
        drop(state);

        info!(endpoint = %name, url = %url, "Registered endpoint");
        true
    }

    /// Removes the endpoint and everything hanging off it. False if unknown.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.state.write().await.remove_endpoint(name);
        if removed {
            info!(endpoint = name, "Unregistered endpoint");
        } else {
            warn!(endpoint = name, "Endpoint not found");
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Option<EndpointInfo> {
        self.state.read().await.endpoints.get(name).cloned()
    }

    /// Snapshot of every registered endpoint.
    pub async fn get_all(&self) -> HashMap<String, EndpointInfo> {
        self.state.read().await.endpoints.clone()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.state.read().await.endpoints.contains_key(name)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    pub async fn get_schema(&self, name: &str) -> Option<SchemaInfo> {
        self.state.read().await.schemas.get(name).cloned()
    }

    /// Replaces the cached schema wholesale. False if the endpoint is unknown.
    pub async fn update_schema(&self, name: &str, schema: SchemaInfo) -> bool {
        let now = self.now();
        let mut state = self.state.write().await;
        if !state.endpoints.contains_key(name) {
            drop(state);
            warn!(endpoint = name, "Endpoint not found");
            return false;
        }

        if let Some(stats) = state.stats.get_mut(name) {
            stats.schema_version = schema.version.clone();
            stats.last_introspection = Some(now);
        }
        state.schemas.insert(name.to_string(), schema);
        state.last_updated.insert(name.to_string(), now);
        drop(state);

        info!(endpoint = name, "Updated schema");
        true
    }

    /// Associates a tool with an endpoint. False if the endpoint is unknown.
    pub async fn register_tool(&self, tool_name: &str, endpoint_name: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.endpoints.contains_key(endpoint_name) {
            drop(state);
            warn!(endpoint = endpoint_name, tool = tool_name, "Endpoint not found");
            return false;
        }

        if let Some(previous) = state.tools.associate(tool_name, endpoint_name) {
            state.refresh_tool_count(&previous);
        }
        state.refresh_tool_count(endpoint_name);
        drop(state);

        debug!(tool = tool_name, endpoint = endpoint_name, "Registered tool");
        true
    }

    /// Removes a single tool association. False if the tool is unknown.
    pub async fn remove_tool(&self, tool_name: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(endpoint) = state.tools.remove_tool(tool_name) else {
            return false;
        };
        state.refresh_tool_count(&endpoint);
        drop(state);

        debug!(tool = tool_name, endpoint = %endpoint, "Removed tool");
        true
    }

    pub async fn get_endpoint_for_tool(&self, tool_name: &str) -> Option<String> {
        self.state
            .read()
            .await
            .tools
            .tool_to_endpoint
            .get(tool_name)
            .cloned()
    }

    pub async fn get_tools_for_endpoint(&self, endpoint_name: &str) -> BTreeSet<String> {
        self.state
            .read()
            .await
            .tools
            .endpoint_to_tools
            .get(endpoint_name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn total_tool_count(&self) -> usize {
        self.state.read().await.tools.tool_to_endpoint.len()
    }

    pub async fn get_endpoint_stats(&self, name: &str) -> Option<EndpointStats> {
        self.state.read().await.stats.get(name).cloned()
    }

    pub async fn get_all_stats(&self) -> HashMap<String, EndpointStats> {
        self.state.read().await.stats.clone()
    }

    /// Counts one access against an endpoint. Unknown endpoints are ignored,
    /// since an access may race with unregistration.
    pub async fn record_access(&self, endpoint_name: &str, success: bool) {
        let now = self.now();
        if let Some(stats) = self.state.write().await.stats.get_mut(endpoint_name) {
            stats.record(success, now);
        }
    }

    /// Unregisters every endpoint idle for longer than `max_age` and returns
    /// how many were removed.
    ///
    /// The scan and the removals happen under one lock acquisition.
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = self.now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        let mut state = self.state.write().await;
        let stale: Vec<String> = state
            .stats
            .iter()
            .filter(|(_, stats)| now - stats.last_activity() > max_age)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            state.remove_endpoint(name);
        }
        drop(state);

        info!(removed = stale.len(), "Cleaned up stale endpoints");
        stale.len()
    }

    pub async fn summary(&self) -> RegistrySummary {
        let state = self.state.read().await;
        RegistrySummary {
            total_endpoints: state.endpoints.len(),
            total_tools: state.tools.tool_to_endpoint.len(),
            endpoints_with_schema: state.schemas.len(),
            last_registry_update: state.last_updated.values().max().copied(),
        }
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
