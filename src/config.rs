use std::env;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub clusters: ClustersConfig,
    pub admin: AdminConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            server: ServerConfig::load(),
            clusters: ClustersConfig::load(),
            admin: AdminConfig::load(),
        }
    }
}

// --- MODULES ---

// SERVER
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    /// Empty disables the plaintext listener.
    pub http_addr: String,
    /// Empty disables the TLS listener.
    pub https_addr: String,
    pub cert_file: String,
    pub key_file: String,
    /// `<= 0` means unlimited.
    pub max_clients: i64,
    pub shutdown_grace_ms: u64,
    pub log_level: String,
}

impl ServerConfig {
    fn load() -> Self {
        Self {
            name:              get_env("KATEWAY_NAME", "kateway"),
            http_addr:         get_env("KATEWAY_HTTP_ADDR", ":9191"),
            https_addr:        get_env("KATEWAY_HTTPS_ADDR", ""),
            cert_file:         get_env("KATEWAY_CERT_FILE", ""),
            key_file:          get_env("KATEWAY_KEY_FILE", ""),
            max_clients:       get_env("KATEWAY_MAX_CLIENTS", "100000"),
            shutdown_grace_ms: get_env("KATEWAY_SHUTDOWN_GRACE_MS", "5000"),
            log_level:         get_env("KATEWAY_LOG", "info"),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// CLUSTERS
#[derive(Debug, Clone)]
pub struct ClustersConfig {
    /// (cluster name, chroot path) pairs.
    pub clusters: Vec<(String, String)>,
}

impl ClustersConfig {
    fn load() -> Self {
        let raw: String = get_env("KATEWAY_CLUSTERS", "local:/");
        Self {
            clusters: parse_clusters(&raw),
        }
    }
}

// ADMIN
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub appid: String,
    /// Empty disables topic creation.
    pub pubkey: String,
    pub default_partitions: i32,
    pub default_replicas: i32,
}

impl AdminConfig {
    pub fn topic_creation_enabled(&self) -> bool {
        !self.pubkey.is_empty()
    }

    fn load() -> Self {
        Self {
            appid:              get_env("KATEWAY_ADMIN_APPID", "_psubAdmin_"),
            pubkey:             get_env("KATEWAY_ADMIN_PUBKEY", ""),
            default_partitions: get_env("KATEWAY_DEFAULT_PARTITIONS", "1"),
            default_replicas:   get_env("KATEWAY_DEFAULT_REPLICAS", "2"),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            appid: "_psubAdmin_".to_string(),
            pubkey: String::new(),
            default_partitions: 1,
            default_replicas: 2,
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    match raw.parse() {
        Ok(value) => value,
        Err(_) => panic!("Config error: {} must be valid, got '{}'", key, raw),
    }
}

/// `name:chroot[,name:chroot...]`. A missing chroot means the store root.
fn parse_clusters(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, chroot)) => (name.trim().to_string(), chroot.trim().to_string()),
            None => (entry.to_string(), "/".to_string()),
        })
        .collect()
}
