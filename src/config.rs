use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once from `SHAREBNB_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    /// Per-attempt wait for a property lock.
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "sharebnb".into(),
            max_connections: 256,
            compact_threshold: 1000,
            lock_timeout: Duration::from_millis(2000),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            port: parsed(&lookup, "SHAREBNB_PORT").unwrap_or(d.port),
            bind: lookup("SHAREBNB_BIND").unwrap_or(d.bind),
            data_dir: lookup("SHAREBNB_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: lookup("SHAREBNB_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "SHAREBNB_MAX_CONNECTIONS")
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "SHAREBNB_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            lock_timeout: parsed(&lookup, "SHAREBNB_LOCK_TIMEOUT_MS")
                .map_or(d.lock_timeout, Duration::from_millis),
            metrics_port: parsed(&lookup, "SHAREBNB_METRICS_PORT"),
            tls_cert: lookup("SHAREBNB_TLS_CERT"),
            tls_key: lookup("SHAREBNB_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
