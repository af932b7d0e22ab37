use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use crate::error::{AppError, Result};

pub const DEFAULT_LLM_MODEL: &str = "deepseek/deepseek-chat-v3-0324";
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_PMC_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles/pmid";

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub openrouter_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub site_url: Option<String>,
    pub database_url: String,
    pub eutils_base_url: String,
    pub pmc_base_url: String,
    pub ncbi_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub public_content_budget: usize,
    pub member_content_budget: usize,
    pub max_search_results: usize,
    pub http_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so tests can
    /// supply values without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("OPENROUTER_API_KEY is not set".to_string()))?;

        // Load server configuration with defaults
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;

        let max_search_results = parse_or(&lookup, "MAX_SEARCH_RESULTS", 10usize)?;
        if max_search_results == 0 || max_search_results > 10 {
            return Err(AppError::ConfigError(format!(
                "MAX_SEARCH_RESULTS must be between 1 and 10, got {}",
                max_search_results
            )));
        }

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            openrouter_api_key,
            llm_model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            llm_base_url: lookup("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            site_url: lookup("SITE_URL").filter(|v| !v.is_empty()),
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://sciensaurus.db".to_string()),
            eutils_base_url: lookup("EUTILS_BASE_URL").unwrap_or_else(|| DEFAULT_EUTILS_BASE_URL.to_string()),
            pmc_base_url: lookup("PMC_BASE_URL").unwrap_or_else(|| DEFAULT_PMC_BASE_URL.to_string()),
            ncbi_api_key: lookup("NCBI_API_KEY").filter(|v| !v.is_empty()),
            tavily_api_key: lookup("TAVILY_API_KEY").filter(|v| !v.is_empty()),
            public_content_budget: parse_or(&lookup, "PUBLIC_CONTENT_BUDGET", 15_000usize)?,
            member_content_budget: parse_or(&lookup, "MEMBER_CONTENT_BUDGET", 50_000usize)?,
            max_search_results,
            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30u64)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "key")])).unwrap();
        assert_eq!(config.server_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.public_content_budget, 15_000);
        assert_eq!(config.member_content_budget, 50_000);
        assert_eq!(config.max_search_results, 10);
        assert_eq!(config.pmc_base_url, DEFAULT_PMC_BASE_URL);
        assert!(config.tavily_api_key.is_none());
    }

    #[test]
    fn requires_api_key() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn rejects_bad_port_and_search_cap() {
        let err = Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "k"), ("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("Invalid PORT"));

        let err = Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "k"), ("MAX_SEARCH_RESULTS", "25")])).unwrap_err();
        assert!(err.to_string().contains("MAX_SEARCH_RESULTS"));
    }
}
