use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 40056;

/// Returns the directory containing the running executable.
/// Falls back to CWD if the exe path cannot be determined.
#[must_use]
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Operator account from the profile. `password` is either plaintext or an
/// Argon2 PHC string (`$argon2id$...`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OperatorCredential {
    pub username: String,
    pub password: String,
}

/// TOML server profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Extensions to load, in order. Empty loads everything statically registered.
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub operators: Vec<OperatorCredential>,
}

impl Profile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid profile {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let profile: Profile = toml::from_str(raw)?;
        for op in &profile.operators {
            if op.username.trim().is_empty() {
                anyhow::bail!("operator entry with an empty username");
            }
        }
        Ok(profile)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub plugins: Vec<String>,
    pub operators: Vec<OperatorCredential>,
    pub operator_queue_capacity: usize,
    pub handshake_timeout_secs: u64,
    /// How long a login token may wait for its event-stream handshake.
    pub pending_token_ttl_secs: u64,
    pub execute_timeout_secs: u64,
}

fn env_u64_in_range(key: &str, default: u64, min: u64, max: u64) -> anyhow::Result<u64> {
    let value = env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {}", key))?;

    if value < min || value > max {
        anyhow::bail!(
            "{} must be between {} and {} (got {})",
            key,
            min,
            max,
            value
        );
    }
    Ok(value)
}

impl AppConfig {
    /// Reads `TEAMSERVER_PROFILE` (if set) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let profile_path = env::var("TEAMSERVER_PROFILE").ok().map(PathBuf::from);
        Self::load_with_profile(profile_path.as_deref())
    }

    pub fn load_with_profile(profile_path: Option<&Path>) -> anyhow::Result<Self> {
        let profile = match profile_path {
            Some(path) => Profile::from_file(path)?,
            None => Profile::default(),
        };

        let host = match env::var("TEAMSERVER_HOST") {
            Ok(addr) => addr,
            Err(_) => profile
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        };
        host.parse::<std::net::IpAddr>().with_context(|| {
            format!(
                "Invalid host '{}': must be a valid IP address (e.g., '127.0.0.1' or '0.0.0.0')",
                host
            )
        })?;

        let port = match env::var("TEAMSERVER_PORT") {
            Ok(port_str) => port_str.parse::<u16>().map_err(|_| {
                anyhow::anyhow!(
                    "Invalid TEAMSERVER_PORT value '{}': must be an integer between 1 and 65535",
                    port_str
                )
            })?,
            Err(_) => profile.port.unwrap_or(DEFAULT_PORT),
        };
        if port == 0 {
            anyhow::bail!("Invalid port '0': must be between 1 and 65535");
        }

        let data_dir = env::var("TEAMSERVER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| exe_dir().join("data"));

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite:{}", data_dir.join("teamserver.db").display())
        });

        let operator_queue_capacity =
            env_u64_in_range("OPERATOR_QUEUE_CAPACITY", 1024, 1, 65536)? as usize;
        let handshake_timeout_secs = env_u64_in_range("HANDSHAKE_TIMEOUT_SECS", 10, 1, 120)?;
        let pending_token_ttl_secs = env_u64_in_range("PENDING_TOKEN_TTL_SECS", 300, 10, 86400)?;
        let execute_timeout_secs = env_u64_in_range("EXECUTE_TIMEOUT_SECS", 300, 1, 3600)?;

        if profile.operators.is_empty() {
            tracing::warn!("⚠️  No operators configured: every login will be rejected.");
        }

        Ok(Self {
            host,
            port,
            data_dir,
            database_url,
            plugins: profile.plugins,
            operators: profile.operators,
            operator_queue_capacity,
            handshake_timeout_secs,
            pending_token_ttl_secs,
            execute_timeout_secs,
        })
    }

    /// Defaults rooted at `data_dir`, backed by an in-memory database.
    #[must_use]
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: data_dir.into(),
            database_url: "sqlite::memory:".to_string(),
            plugins: Vec::new(),
            operators: Vec::new(),
            operator_queue_capacity: 1024,
            handshake_timeout_secs: 10,
            pending_token_ttl_secs: 300,
            execute_timeout_secs: 300,
        }
    }

    #[must_use]
    pub fn listeners_dir(&self) -> PathBuf {
        self.data_dir.join("listeners")
    }

    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
