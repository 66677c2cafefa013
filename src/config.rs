use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::EndpointInfo;
use crate::error::{HubError, HubResult};
use crate::operations::OperationSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Runtime settings for the gqlhub server.
#[derive(Clone, Debug, Parser)]
#[command(name = "gqlhub", author, version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "GQLHUB_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "GQLHUB_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Per-operation timeout for outbound GraphQL calls, in seconds.
    #[arg(long, env = "GQLHUB_HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout: u64,

    /// YAML file of endpoints to register at startup.
    #[arg(long, env = "GQLHUB_ENDPOINTS_FILE")]
    pub endpoints_file: Option<PathBuf>,

    /// Seconds between stale-endpoint sweeps.
    #[arg(long, env = "GQLHUB_CLEANUP_INTERVAL", default_value_t = 3600)]
    pub cleanup_interval: u64,

    /// Endpoints idle for longer than this many seconds are removed.
    #[arg(long, env = "GQLHUB_STALE_AFTER", default_value_t = 86400)]
    pub stale_after: u64,

    #[arg(long, env = "GQLHUB_MAX_BATCH_SIZE", default_value_t = 10)]
    pub max_batch_size: usize,

    #[arg(
        long,
        env = "GQLHUB_PARALLEL_BATCH_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub parallel_batch_enabled: bool,

    #[arg(long, env = "GQLHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "GQLHUB_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }

    pub fn operation_settings(&self) -> OperationSettings {
        OperationSettings {
            default_timeout: self.http_timeout(),
            max_batch_size: self.max_batch_size,
            parallel_batch_enabled: self.parallel_batch_enabled,
        }
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.http_timeout == 0 {
            return Err(HubError::Config("http_timeout must be positive".to_string()));
        }
        if self.cleanup_interval == 0 {
            return Err(HubError::Config(
                "cleanup_interval must be positive".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(HubError::Config("max_batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EndpointsFile {
    #[serde(default)]
    endpoints: BTreeMap<String, EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    allow_mutations: bool,
    #[serde(default)]
    tool_prefix: String,
}

/// Reads the endpoint list from a YAML file, ordered by endpoint name.
pub fn load_endpoints_file(path: &Path) -> HubResult<Vec<EndpointInfo>> {
    let contents = fs::read_to_string(path)?;
    let file: EndpointsFile = serde_yaml::from_str(&contents)?;

    let endpoints = file
        .endpoints
        .into_iter()
        .map(|(name, entry)| EndpointInfo {
            name,
            url: entry.url,
            headers: entry.headers,
            allow_mutations: entry.allow_mutations,
            tool_prefix: entry.tool_prefix,
        })
        .collect::<Vec<_>>();
    for endpoint in &endpoints {
        endpoint.validate()?;
    }

    info!(path = %path.display(), endpoints = endpoints.len(), "Loaded endpoints file");
    Ok(endpoints)
}
