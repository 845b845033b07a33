use anyhow::{ensure, Context};
use clap::{Args, ValueEnum};
use firewatch_core::types::FIRE_REPORTS;
use firewatch_ws::GatewayConfig;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process store, nothing leaves the machine
    Memory,
    /// Remote document service over the WebSocket gateway
    Gateway,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Gateway => "gateway",
        }
    }
}

/// Backend connection settings. Flags win over environment variables.
#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Gateway WebSocket URL
    #[arg(long = "gateway-url", env = "FIREWATCH_GATEWAY_URL")]
    pub url: Option<String>,
    #[arg(long, env = "FIREWATCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "FIREWATCH_AUTH_DOMAIN")]
    pub auth_domain: Option<String>,
    #[arg(long, env = "FIREWATCH_PROJECT_ID")]
    pub project_id: Option<String>,
    #[arg(long, env = "FIREWATCH_APP_ID")]
    pub app_id: Option<String>,
    /// Collection holding the incident reports
    #[arg(long, env = "FIREWATCH_COLLECTION", default_value = FIRE_REPORTS)]
    pub collection: String,
    /// Ping interval (e.g., "30s")
    #[arg(long, default_value = "30s")]
    pub ping_interval: String,
}

impl BackendArgs {
    pub fn validate(&self, backend: BackendKind) -> anyhow::Result<()> {
        ensure!(!self.collection.trim().is_empty(), "collection name must not be empty");
        let ping_interval = parse_duration(&self.ping_interval)
            .context("Invalid ping interval format (e.g., '30s', '1m')")?;
        ensure!(!ping_interval.is_zero(), "ping interval must be greater than zero");

        if backend == BackendKind::Gateway {
            ensure!(
                self.url.as_deref().is_some_and(|u| !u.is_empty()),
                "gateway backend requires --gateway-url or FIREWATCH_GATEWAY_URL"
            );
            ensure!(
                self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
                "gateway backend requires --api-key or FIREWATCH_API_KEY"
            );
            ensure!(
                self.project_id.as_deref().is_some_and(|p| !p.is_empty()),
                "gateway backend requires --project-id or FIREWATCH_PROJECT_ID"
            );
        }
        Ok(())
    }

    pub fn log_effective(&self, backend: BackendKind) {
        info!(
            backend = backend.as_str(),
            collection = %self.collection,
            url = self.url.as_deref().unwrap_or("-"),
            project_id = self.project_id.as_deref().unwrap_or("-"),
            app_id = self.app_id.as_deref().unwrap_or("-"),
            auth_domain = self.auth_domain.as_deref().unwrap_or("-"),
            api_key = %redact(self.api_key.as_deref()),
            "Effective configuration"
        );
    }

    pub fn to_gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        self.validate(BackendKind::Gateway)?;
        let mut config = GatewayConfig::new(
            self.url.clone().unwrap_or_default(),
            self.api_key.clone().unwrap_or_default(),
            self.project_id.clone().unwrap_or_default(),
        );
        config.app_id = self.app_id.clone();
        config.auth_domain = self.auth_domain.clone();
        config.ping_interval = parse_duration(&self.ping_interval)?;
        Ok(config)
    }
}

fn redact(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "-".to_string(),
        Some(s) if s.len() <= 4 => "****".to_string(),
        Some(s) => format!("{}****", &s[..s.char_indices().nth(4).map_or(s.len(), |(i, _)| i)]),
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.parse()?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(secs.parse()?))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse()?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        Ok(Duration::from_secs(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> BackendArgs {
        BackendArgs {
            url: Some("wss://gateway.example/ws".into()),
            api_key: Some("AIzaSyExampleKey".into()),
            auth_domain: None,
            project_id: Some("fire-project".into()),
            app_id: None,
            collection: FIRE_REPORTS.into(),
            ping_interval: "30s".into(),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let mut a = args();
        a.url = None;
        a.api_key = None;
        a.project_id = None;
        assert!(a.validate(BackendKind::Memory).is_ok());
        assert!(a.validate(BackendKind::Gateway).is_err());
    }

    #[test]
    fn test_gateway_config() {
        let mut a = args();
        a.ping_interval = "10s".into();
        a.app_id = Some("1:abc".into());
        let config = a.to_gateway_config().unwrap();
        assert_eq!(config.url, "wss://gateway.example/ws");
        assert_eq!(config.project_id, "fire-project");
        assert_eq!(config.app_id.as_deref(), Some("1:abc"));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_ping_interval_rejected() {
        let mut a = args();
        a.ping_interval = "0s".into();
        assert!(a.validate(BackendKind::Memory).is_err());
        assert!(a.to_gateway_config().is_err());

        a.ping_interval = "0ms".into();
        assert!(a.validate(BackendKind::Gateway).is_err());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let mut a = args();
        a.api_key = Some(String::new());
        assert!(a.to_gateway_config().is_err());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact(None), "-");
        assert_eq!(redact(Some("abc")), "****");
        assert_eq!(redact(Some("AIzaSyExampleKey")), "AIza****");
    }
}
