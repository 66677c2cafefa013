//! In-process gateway double for unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ErrorCategory, ExecutionError};
use crate::query_executor::{
    ExecutionMetadata, GatewayResponse, GraphQLGateway, GraphQLRequest, INTROSPECTION_OPERATION,
};

/// Scripted behaviour for one query text.
#[derive(Clone)]
pub(crate) enum Reply {
    Data(Value),
    Partial(Value, &'static str),
    Fail(ErrorCategory, &'static str),
    Panic,
}

#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub url: String,
    pub query: String,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    introspection: Option<Value>,
    calls: Mutex<Vec<Call>>,
    completed: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, query: &str, reply: Reply) -> Self {
        self.replies.insert(query.to_string(), reply);
        self
    }

    pub(crate) fn delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub(crate) fn introspection(mut self, data: Value) -> Self {
        self.introspection = Some(data);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Queries in the order their calls finished.
    pub(crate) fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphQLGateway for FakeGateway {
    async fn execute(
        &self,
        url: &str,
        request: &GraphQLRequest,
        timeout: Duration,
    ) -> GatewayResponse {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            query: request.query.clone(),
            timeout,
            headers: request.headers.clone(),
        });
        if let Some(delay) = self.delays.get(&request.query) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().unwrap().push(request.query.clone());

        let metadata = ExecutionMetadata::start(request.operation_name.clone());
        if request.operation_name.as_deref() == Some(INTROSPECTION_OPERATION) {
            return match &self.introspection {
                Some(data) => GatewayResponse {
                    data: Some(data.clone()),
                    errors: Vec::new(),
                    metadata,
                },
                None => GatewayResponse::failed(
                    ExecutionError::new(ErrorCategory::GraphQL, "introspection disabled"),
                    metadata,
                ),
            };
        }

        match self.replies.get(&request.query).cloned() {
            Some(Reply::Data(data)) => GatewayResponse {
                data: Some(data),
                errors: Vec::new(),
                metadata,
            },
            Some(Reply::Partial(data, message)) => GatewayResponse {
                data: Some(data),
                errors: vec![ExecutionError::new(ErrorCategory::GraphQL, message)],
                metadata,
            },
            Some(Reply::Fail(category, message)) => {
                GatewayResponse::failed(ExecutionError::new(category, message), metadata)
            }
            Some(Reply::Panic) => panic!("scripted gateway fault"),
            None => GatewayResponse {
                data: Some(json!({ "echo": request.query })),
                errors: Vec::new(),
                metadata,
            },
        }
    }
}
