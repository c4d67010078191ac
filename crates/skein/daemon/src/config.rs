//! Configuration for skeind

use serde::{Deserialize, Serialize};
use skein_runtime::RuntimeConfig;
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// This node and its peers
    #[serde(default)]
    pub node: NodeConfig,

    /// Shared by the query and bulk runtimes
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub bulk: BulkConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Node identity and ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,

    /// Every node sharing the store, this one included; empty means this
    /// node owns every instance
    #[serde(default)]
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            peers: Vec::new(),
        }
    }
}

/// Expiration sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

/// Query page sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Bulk import limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_node_id() -> String {
    "local".to_string()
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_page_size() -> usize {
    skein_query::DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    skein_query::MAX_PAGE_SIZE
}

fn default_max_attempts() -> u32 {
    skein_bulk::MAX_ATTEMPTS
}

fn default_batch_size() -> usize {
    skein_bulk::SIDE_EFFECT_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `SKEIN_`-prefixed environment variables (`SKEIN_SERVER__LISTEN_ADDR`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SKEIN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Every node id ownership is spread over
    pub fn cluster(&self) -> Vec<String> {
        let mut nodes = self.node.peers.clone();
        if !nodes.contains(&self.node.id) {
            nodes.push(self.node.id.clone());
        }
        nodes.sort();
        nodes
    }
}
