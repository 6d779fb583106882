//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, RmiResult, DEFAULT_MAX_RETRIES};

/// Write buffer entries outlive the read cache so a pending write is never
/// shadowed by an older cached value.
pub const DEFAULT_WRITE_BUFFER_TTL: Duration = Duration::from_secs(6 * 3600);
pub const DEFAULT_READ_CACHE_TTL: Duration = Duration::from_secs(3 * 3600);
pub const DEFAULT_READ_CACHE_REFRESH_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_COMPOSITE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_OUTDATED_THRESHOLD: Duration = Duration::from_secs(180 * 24 * 3600);
pub const DEFAULT_VERIFICATION_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable store collection names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNames {
    pub citizens: String,
    pub self_declared: String,
    pub phone_verifications: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            citizens: "citizens".to_string(),
            self_declared: "self_declared".to_string(),
            phone_verifications: "phone_verifications".to_string(),
        }
    }
}

/// Engine configuration shared by every component.
///
/// Built once at process start and handed to each component constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// TTL of `<field>:write:<cpf>` entries.
    pub write_buffer_ttl: Duration,
    /// TTL of `<field>:cache:<cpf>` entries repopulated from the durable store.
    pub read_cache_ttl: Duration,
    /// TTL used when the read cache is refreshed explicitly.
    pub read_cache_refresh_ttl: Duration,
    /// TTL of the cached composite view.
    pub composite_ttl: Duration,
    /// Whether composite views are cached at all.
    pub composite_cache_enabled: bool,
    /// Age beyond which identical resubmissions are accepted.
    pub outdated_threshold: Duration,
    /// Lifetime of a phone verification code.
    pub verification_ttl: Duration,
    /// Deadline applied to every cache, store and queue call.
    pub backend_timeout: Duration,
    /// Retries granted to each sync job.
    pub job_max_retries: u32,
    pub collections: CollectionNames,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_ttl: DEFAULT_WRITE_BUFFER_TTL,
            read_cache_ttl: DEFAULT_READ_CACHE_TTL,
            read_cache_refresh_ttl: DEFAULT_READ_CACHE_REFRESH_TTL,
            composite_ttl: DEFAULT_COMPOSITE_TTL,
            composite_cache_enabled: true,
            outdated_threshold: DEFAULT_OUTDATED_THRESHOLD,
            verification_ttl: DEFAULT_VERIFICATION_TTL,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            job_max_retries: DEFAULT_MAX_RETRIES,
            collections: CollectionNames::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_buffer_ttl(mut self, ttl: Duration) -> Self {
        self.write_buffer_ttl = ttl;
        self
    }

    pub fn with_read_cache_ttl(mut self, ttl: Duration) -> Self {
        self.read_cache_ttl = ttl;
        self
    }

    pub fn with_composite_ttl(mut self, ttl: Duration) -> Self {
        self.composite_ttl = ttl;
        self
    }

    pub fn with_composite_cache(mut self, enabled: bool) -> Self {
        self.composite_cache_enabled = enabled;
        self
    }

    pub fn with_outdated_threshold(mut self, threshold: Duration) -> Self {
        self.outdated_threshold = threshold;
        self
    }

    pub fn with_verification_ttl(mut self, ttl: Duration) -> Self {
        self.verification_ttl = ttl;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_job_max_retries(mut self, retries: u32) -> Self {
        self.job_max_retries = retries;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every TTL and the backend timeout are non-zero
    /// - the write buffer outlives the read cache
    /// - at least one sync attempt is allowed
    /// - collection names are non-empty
    pub fn validate(&self) -> RmiResult<()> {
        let durations = [
            ("write_buffer_ttl", self.write_buffer_ttl),
            ("read_cache_ttl", self.read_cache_ttl),
            ("read_cache_refresh_ttl", self.read_cache_refresh_ttl),
            ("composite_ttl", self.composite_ttl),
            ("outdated_threshold", self.outdated_threshold),
            ("verification_ttl", self.verification_ttl),
            ("backend_timeout", self.backend_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "must be positive".to_string(),
                }
                .into());
            }
        }

        if self.write_buffer_ttl < self.read_cache_ttl {
            return Err(ConfigError::InvalidValue {
                field: "write_buffer_ttl".to_string(),
                value: format!("{:?}", self.write_buffer_ttl),
                reason: format!(
                    "must not be shorter than read_cache_ttl ({:?})",
                    self.read_cache_ttl
                ),
            }
            .into());
        }

        if self.job_max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "job_max_retries".to_string(),
                value: "0".to_string(),
                reason: "must allow at least one attempt".to_string(),
            }
            .into());
        }

        let names = [
            ("collections.citizens", &self.collections.citizens),
            ("collections.self_declared", &self.collections.self_declared),
            ("collections.phone_verifications", &self.collections.phone_verifications),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
