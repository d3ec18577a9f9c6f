use std::fmt::{Display, Formatter};
use std::str::FromStr;

use caseline_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Traffic categories enforced by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Login, registration, and credential recovery traffic.
    Authentication,
    /// Authenticated API traffic.
    Api,
    /// Document and media upload traffic.
    FileUpload,
    /// Inbound webhook deliveries from partner systems.
    Webhook,
    /// Unauthenticated traffic outside the API prefix.
    Public,
    /// Liveness and readiness probes.
    Health,
}

/// Static admission policy for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of requests admitted per window.
    pub limit: u32,
    /// Sliding window length in seconds.
    pub window_seconds: u64,
    /// Whether requests are bucketed per identified user.
    pub track_by_user: bool,
    /// Whether requests are bucketed per client address.
    pub track_by_ip: bool,
    /// Message returned to callers when the limit is exceeded.
    pub message: &'static str,
}

impl Category {
    /// Returns a stable storage value for this category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Api => "api",
            Self::FileUpload => "file_upload",
            Self::Webhook => "webhook",
            Self::Public => "public",
            Self::Health => "health",
        }
    }

    /// Returns all known categories.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Category] = &[
            Category::Authentication,
            Category::Api,
            Category::FileUpload,
            Category::Webhook,
            Category::Public,
            Category::Health,
        ];

        ALL
    }

    /// Returns the admission policy for this category.
    ///
    /// The match is exhaustive, so adding a category without a policy fails
    /// at compile time rather than at lookup time.
    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        match self {
            Self::Authentication => RateLimitConfig {
                limit: 10,
                window_seconds: 900,
                track_by_user: true,
                track_by_ip: true,
                message: "Too many authentication attempts. Please try again later.",
            },
            Self::Api => RateLimitConfig {
                limit: 300,
                window_seconds: 60,
                track_by_user: true,
                track_by_ip: false,
                message: "API request limit reached. Please slow down.",
            },
            Self::FileUpload => RateLimitConfig {
                limit: 20,
                window_seconds: 3600,
                track_by_user: true,
                track_by_ip: true,
                message: "Upload limit reached. Please try again later.",
            },
            Self::Webhook => RateLimitConfig {
                limit: 60,
                window_seconds: 60,
                track_by_user: false,
                track_by_ip: true,
                message: "Webhook delivery limit reached.",
            },
            Self::Public => RateLimitConfig {
                limit: 120,
                window_seconds: 60,
                track_by_user: false,
                track_by_ip: true,
                message: "Request limit reached. Please slow down.",
            },
            Self::Health => RateLimitConfig {
                limit: 600,
                window_seconds: 60,
                track_by_user: false,
                track_by_ip: true,
                message: "Health check limit reached.",
            },
        }
    }

    /// Validates the compiled-in policy table.
    ///
    /// A non-positive limit or window is a deployment mistake that must stop
    /// the process at boot, never be silently defaulted.
    pub fn validate_configs() -> AppResult<()> {
        for category in Self::all() {
            let config = category.config();

            if config.limit == 0 {
                return Err(AppError::Validation(format!(
                    "category '{category}' has a zero request limit"
                )));
            }

            if config.window_seconds == 0 {
                return Err(AppError::Validation(format!(
                    "category '{category}' has a zero-length window"
                )));
            }
        }

        Ok(())
    }
}

impl Display for Category {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authentication" => Ok(Self::Authentication),
            "api" => Ok(Self::Api),
            "file_upload" => Ok(Self::FileUpload),
            "webhook" => Ok(Self::Webhook),
            "public" => Ok(Self::Public),
            "health" => Ok(Self::Health),
            _ => Err(AppError::Validation(format!(
                "unknown rate limit category '{value}'"
            ))),
        }
    }
}
