use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Process configuration, read once at startup from `NATTER_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("NATTER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("NATTER_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let port = match get("NATTER_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("NATTER_PORT '{}' is not a port number", raw))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: get("NATTER_DB_PATH")
                .unwrap_or_else(|| "natter.db".into())
                .into(),
            host: get("NATTER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            api_prefix: normalize_prefix(
                &get("NATTER_API_PREFIX").unwrap_or_else(|| "/api/v1".into()),
            ),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// `api/v1/` -> `/api/v1`; an empty or root prefix becomes `""`.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
