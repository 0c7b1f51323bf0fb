use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process bootstrap settings. Runtime tunables live in the store as
/// [`crate::models::AppSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Holds `notes.db` and the `logs/` directory.
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Reads:
    /// - `NOTES_SYNC_DATA_DIR` (default `./data`)
    /// - `NOTES_SYNC_BIND` (default `127.0.0.1:8787`)
    /// - `NOTES_SYNC_LOG` (default `info`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("NOTES_SYNC_DATA_DIR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let bind_addr = match lookup("NOTES_SYNC_BIND") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, fallback = DEFAULT_BIND, "invalid bind address");
                Self::default().bind_addr
            }),
            None => Self::default().bind_addr,
        };

        let log_filter = lookup("NOTES_SYNC_LOG")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Self {
            data_dir,
            bind_addr,
            log_filter,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("notes.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
