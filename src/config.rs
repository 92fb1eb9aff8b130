use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_TOP_K: usize = 100;

/// Runtime settings, read from the process environment. The binary loads
/// `.env` into the environment before these are read.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database_schema: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub sample_rows: usize,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub model: String,
    pub model_timeout: Duration,
    pub top_k: usize,
    /// Collaborators older than this are rebuilt before the next question.
    pub resource_max_age: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Settings {
            database_url,
            database_schema: lookup("DATABASE_SCHEMA").unwrap_or_else(|| "public".to_string()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            acquire_timeout: Duration::from_secs(parse_or(
                &lookup,
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                30,
            )?),
            sample_rows: parse_or(&lookup, "SAMPLE_ROWS_IN_TABLE_INFO", 3)?,
            ollama_host: ollama_host(&lookup)?,
            ollama_port: parse_or(&lookup, "OLLAMA_PORT", 11434)?,
            model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.2:latest".to_string()),
            model_timeout: Duration::from_secs(parse_or(&lookup, "MODEL_TIMEOUT_SECS", 120)?),
            top_k: parse_or(&lookup, "TOP_K", DEFAULT_TOP_K)?,
            resource_max_age: Duration::from_secs(parse_or(
                &lookup,
                "RESOURCE_MAX_AGE_SECS",
                3300,
            )?),
        })
    }
}

/// The model endpoint must be an absolute `http(s)` URL with a host.
fn ollama_host<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup("OLLAMA_HOST") else {
        return Ok("http://localhost".to_string());
    };

    let invalid = || ConfigError::Invalid {
        name: "OLLAMA_HOST",
        value: value.clone(),
    };

    let parsed = Url::parse(value.trim()).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(value.trim().to_string()),
        _ => Err(invalid()),
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
