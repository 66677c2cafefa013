use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::error::{ExecutionError, Severity};

pub const USER_AGENT: &str = concat!("gqlhub/", env!("CARGO_PKG_VERSION"));

pub const INTROSPECTION_OPERATION: &str = "IntrospectionQuery";

pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types {
      ...FullType
    }
    directives {
      name
      description
      locations
      args {
        ...InputValue
      }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args {
      ...InputValue
    }
    type {
      ...TypeRef
    }
    isDeprecated
    deprecationReason
  }
  inputFields {
    ...InputValue
  }
  interfaces {
    ...TypeRef
  }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes {
    ...TypeRef
  }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

/// Headers whose value reports server-side processing time.
const SERVER_TIMING_HEADERS: [&str; 4] = [
    "x-response-time",
    "x-processing-time",
    "server-timing",
    "x-execution-time",
];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub headers: HashMap<String, String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Option<Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, operation_name: Option<String>) -> Self {
        self.operation_name = operation_name;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), Value::String(self.query.clone()));
        body.insert(
            "variables".to_string(),
            self.variables
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
        if let Some(name) = &self.operation_name {
            body.insert("operationName".to_string(), Value::String(name.clone()));
        }
        Value::Object(body)
    }
}

/// Timing information collected around one gateway call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub operation_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub server_time_ms: Option<u64>,
    pub network_time_ms: Option<u64>,
    pub response_bytes: Option<usize>,
}

impl ExecutionMetadata {
    pub fn start(operation_name: Option<String>) -> Self {
        ExecutionMetadata {
            operation_name,
            start_time: Utc::now(),
            end_time: None,
            execution_time_ms: 0,
            server_time_ms: None,
            network_time_ms: None,
            response_bytes: None,
        }
    }

    fn finish(&mut self, elapsed: Duration) {
        self.end_time = Some(Utc::now());
        self.execution_time_ms = elapsed.as_millis() as u64;
        self.network_time_ms = Some(
            self.execution_time_ms
                .saturating_sub(self.server_time_ms.unwrap_or(0)),
        );
    }
}

/// The tri-part outcome of one GraphQL call: data, errors and timing.
///
/// `data` and `errors` may both be populated when the server returned a
/// partial result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub data: Option<Value>,
    pub errors: Vec<ExecutionError>,
    pub metadata: ExecutionMetadata,
}

impl GatewayResponse {
    pub fn failed(error: ExecutionError, metadata: ExecutionMetadata) -> Self {
        GatewayResponse {
            data: None,
            errors: vec![error],
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[async_trait]
pub trait GraphQLGateway: Send + Sync {
    async fn execute(&self, url: &str, request: &GraphQLRequest, timeout: Duration)
    -> GatewayResponse;

    /// Issues the standard introspection query against `url`.
    async fn introspect(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> GatewayResponse {
        let request = GraphQLRequest::new(INTROSPECTION_QUERY)
            .with_operation_name(Some(INTROSPECTION_OPERATION.to_string()))
            .with_headers(headers.clone());
        self.execute(url, &request, timeout).await
    }
}

pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new() -> Self {
        HttpGateway {
            client: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        url: &str,
        request: &GraphQLRequest,
        timeout: Duration,
        metadata: &mut ExecutionMetadata,
    ) -> Result<(Option<Value>, Vec<ExecutionError>), ExecutionError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .headers(request_headers(&request.headers))
            .json(&request.body())
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        metadata.server_time_ms = server_time_ms(response.headers());

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ExecutionError::http_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;
        metadata.response_bytes = Some(body.len());

        let payload: Value =
            serde_json::from_slice(&body).map_err(ExecutionError::invalid_json)?;
        let Value::Object(mut payload) = payload else {
            return Err(ExecutionError::invalid_json("expected a JSON object"));
        };

        let data = payload.remove("data").filter(|d| !d.is_null());
        let mut errors: Vec<ExecutionError> = match payload.remove("errors") {
            Some(Value::Array(entries)) => entries.iter().map(ExecutionError::from_graphql).collect(),
            _ => Vec::new(),
        };
        if data.is_some() {
            for error in &mut errors {
                error.severity = Severity::Warning;
            }
        }

        Ok((data, errors))
    }
}

impl Default for HttpGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphQLGateway for HttpGateway {
    async fn execute(
        &self,
        url: &str,
        request: &GraphQLRequest,
        timeout: Duration,
    ) -> GatewayResponse {
        let mut metadata = ExecutionMetadata::start(request.operation_name.clone());
        let started = Instant::now();

        let outcome = self.send(url, request, timeout, &mut metadata).await;
        metadata.finish(started.elapsed());

        match outcome {
            Ok((data, errors)) => {
                debug!(
                    url,
                    elapsed_ms = metadata.execution_time_ms,
                    errors = errors.len(),
                    "GraphQL request completed"
                );
                GatewayResponse {
                    data,
                    errors,
                    metadata,
                }
            }
            Err(e) => {
                error!(url, category = %e.category, error = %e.message, "GraphQL request failed");
                GatewayResponse::failed(e, metadata)
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> ExecutionError {
    if e.is_timeout() {
        ExecutionError::timeout(timeout.as_secs())
    } else if e.is_connect() {
        ExecutionError::connection(e)
    } else if e.is_decode() {
        ExecutionError::invalid_json(e)
    } else {
        ExecutionError::unexpected(e)
    }
}

/// Default headers overlaid with the endpoint's own; endpoint values win.
fn request_headers(custom: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    for (key, value) in custom {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %key, "Skipping invalid endpoint header"),
        }
    }
    headers
}

fn server_time_ms(headers: &HeaderMap) -> Option<u64> {
    SERVER_TIMING_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find_map(parse_duration_ms)
}

/// Parses `"123ms"`, `"0.5s"` or a bare millisecond count.
fn parse_duration_ms(value: &str) -> Option<u64> {
    let value = value.trim();
    let millis = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<f64>().ok()?
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<f64>().ok()? * 1000.0
    } else {
        value.parse::<f64>().ok()?
    };
    (millis.is_finite() && millis >= 0.0).then_some(millis as u64)
}
