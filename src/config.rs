use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};

const DEFAULT_PORT: &str = "4000";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const MIN_SESSION_KEY_BYTES: usize = 32;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub session_key: Vec<u8>,
    pub db_max_connections: u32,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} missing"))
        };

        let session_key = general_purpose::STANDARD
            .decode(required("SESSION_KEY")?.trim())
            .context("SESSION_KEY must be base64")?;
        if session_key.len() < MIN_SESSION_KEY_BYTES {
            bail!("SESSION_KEY must decode to at least {MIN_SESSION_KEY_BYTES} bytes");
        }

        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| {
            let port = lookup("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
            format!("0.0.0.0:{}", port)
        });

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: lookup("OPENAI_MODEL")
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| crate::services::ai::DEFAULT_MODEL.to_string()),
            session_key,
            db_max_connections,
            bind_addr,
            cors_origins,
            production: lookup("PRODUCTION").is_some(),
        })
    }
}
