use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, HeaderValue,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gqlhub::config::load_endpoints_file;
use gqlhub::tools::TOOL_NAMES;
use gqlhub::{
    CombinedOperations, Config, EndpointRegistry, HttpGateway, HubResult, LogFormat, ToolResponse,
    ToolRouter,
};

const TOOLS_PREFIX: &str = "/tools/";

fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: StatusCode, body: &Value) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn tool_response(response: &ToolResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = serde_json::to_value(response).unwrap_or_else(|_| json!({ "success": false }));
    json_response(StatusCode::OK, &body)
}

async fn handle_request(
    req: Request<Incoming>,
    router: Arc<ToolRouter>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => {
            let summary = router.operations().registry().summary().await;
            json_response(
                StatusCode::OK,
                &json!({ "status": "ok", "registry": summary, "tools": TOOL_NAMES }),
            )
        }

        (&Method::POST, p) if p.starts_with(TOOLS_PREFIX) => {
            let tool = p[TOOLS_PREFIX.len()..].to_string();
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "Failed to read request body");
                    return Ok(tool_response(&ToolResponse::error(
                        "Failed to read request body",
                    )));
                }
            };

            let args = if body_bytes.is_empty() {
                Value::Null
            } else {
                match serde_json::from_slice::<Value>(&body_bytes) {
                    Ok(args) => args,
                    Err(e) => {
                        return Ok(json_response(
                            StatusCode::BAD_REQUEST,
                            &json!({
                                "success": false,
                                "data": null,
                                "errors": [format!("Invalid JSON request: {}", e)],
                            }),
                        ));
                    }
                }
            };

            tool_response(&router.call(&tool, args).await)
        }

        (&Method::OPTIONS, _) => {
            let mut response = Response::new(full(""));
            *response.status_mut() = StatusCode::NO_CONTENT;
            let headers = response.headers_mut();
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            );
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
            response
        }

        _ => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "success": false, "data": null, "errors": ["Not Found"] }),
        ),
    };

    debug!(method = %method, path = %path, status = response.status().as_u16(), "Handled request");
    Ok(response)
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gqlhub={}", config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn register_configured_endpoints(config: &Config, ops: &CombinedOperations) -> HubResult<()> {
    let Some(path) = &config.endpoints_file else {
        return Ok(());
    };

    for endpoint in load_endpoints_file(path)? {
        let name = endpoint.name.clone();
        let report = ops.register_endpoint(endpoint, true).await?;
        if report.errors.is_empty() {
            info!(endpoint = %name, tools = report.tools.len(), "Registered configured endpoint");
        } else {
            warn!(
                endpoint = %name,
                errors = ?report.errors,
                "Registered configured endpoint without schema"
            );
        }
    }
    Ok(())
}

fn spawn_stale_sweep(registry: EndpointRegistry, config: &Config) -> tokio::task::JoinHandle<()> {
    let interval = config.cleanup_interval();
    let max_age = config.stale_after();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_stale(max_age).await;
            if removed > 0 {
                info!(removed, "Removed stale endpoints");
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();
    init_tracing(&config);
    config.validate()?;

    let registry = EndpointRegistry::new();
    let gateway = Arc::new(HttpGateway::new());
    let ops = CombinedOperations::new(registry.clone(), gateway, config.operation_settings());

    register_configured_endpoints(&config, &ops).await?;
    let sweep = spawn_stale_sweep(registry, &config);

    let router = Arc::new(ToolRouter::new(ops, config.stale_after()));
    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gqlhub listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        };
        let io = TokioIo::new(stream);
        let router = Arc::clone(&router);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, router.clone()));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                error!(%peer, error = %e, "Error processing connection");
            }
        });
    }

    sweep.abort();
    Ok(())
}
