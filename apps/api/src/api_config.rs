use std::env;
use std::time::Duration;

use caseline_core::{AppError, OrgId};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_host: String,
    pub api_port: u16,
    /// Shared store connection string. `None` means permanent per-instance
    /// fallback mode, announced with a startup warning.
    pub redis_url: Option<String>,
    pub rate_limit_key_prefix: String,
    pub audit_flush_interval: Duration,
    pub fallback_sweep_interval: Duration,
    pub audit_org_id: OrgId,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = env::var("API_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3001);

        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let rate_limit_key_prefix =
            env::var("RATE_LIMIT_KEY_PREFIX").unwrap_or_else(|_| "caseline:rl".to_owned());

        let audit_flush_interval =
            interval_env("AUDIT_FLUSH_INTERVAL_SECONDS", Duration::from_secs(60))?;
        let fallback_sweep_interval =
            interval_env("FALLBACK_SWEEP_INTERVAL_SECONDS", Duration::from_secs(300))?;

        let audit_org_id = match env::var("AUDIT_ORG_ID") {
            Ok(value) if !value.trim().is_empty() => uuid::Uuid::parse_str(value.trim())
                .map(OrgId::from_uuid)
                .map_err(|error| {
                    AppError::Validation(format!("invalid AUDIT_ORG_ID: {error}"))
                })?,
            _ => OrgId::system(),
        };

        Ok(Self {
            api_host,
            api_port,
            redis_url,
            rate_limit_key_prefix,
            audit_flush_interval,
            fallback_sweep_interval,
            audit_org_id,
        })
    }
}

fn interval_env(name: &str, default: Duration) -> Result<Duration, AppError> {
    match env::var(name) {
        Ok(value) => {
            let seconds = value
                .parse::<u64>()
                .map_err(|error| AppError::Validation(format!("invalid {name}: {error}")))?;

            if seconds == 0 {
                return Err(AppError::Validation(format!("{name} must be positive")));
            }

            Ok(Duration::from_secs(seconds))
        }
        Err(_) => Ok(default),
    }
}
