//! Configuration loading and validation for the vault service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::fmt;

use anyhow::{Context, Result};
use common::record::FieldType;
use serde::Deserialize;
use zeroize::Zeroize;

use crate::keys::MIN_MASTER_SECRET_LEN;

/// A secret string that never shows up in `Debug` output and is wiped on drop.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Validated vault service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Long-lived passphrase the master key is stretched from. **Required.**
    pub master_secret: Secret,

    /// Install-specific identifier; its hash salts the master key and the
    /// search index. **Required.**
    pub install_id: String,

    /// Lowest key version a tenant starts at. A tenant whose persisted
    /// active version is higher keeps the persisted one.
    #[serde(default = "default_active_key_version")]
    pub active_key_version: u32,

    /// Argon2id time cost for the master key.
    #[serde(default = "default_kdf_time_cost")]
    pub kdf_time_cost: u32,

    /// Argon2id memory cost (KiB) for the master key.
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,

    /// PBKDF2 iteration count for exact-match search hashes.
    #[serde(default = "default_search_hash_iterations")]
    pub search_hash_iterations: u32,

    /// Country calling code assumed for phone numbers without one.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    /// Upper bound on partial-match tokens per field.
    #[serde(default = "default_max_search_tokens")]
    pub max_search_tokens: usize,

    /// Comma-separated field types that get partial-match tokens.
    #[serde(default = "default_partial_search_fields")]
    pub partial_search_fields: String,

    /// Lifetime of a cached plaintext, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached plaintexts.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// How often (seconds) the cache sweeps out expired entries.
    #[serde(default = "default_cache_purge_interval")]
    pub cache_purge_interval_secs: u64,

    /// Maximum number of unwrapped subject keys held in memory.
    #[serde(default = "default_subject_key_cache_capacity")]
    pub subject_key_cache_capacity: usize,

    /// Lifetime of an unwrapped subject key in memory, in seconds.
    #[serde(default = "default_subject_key_cache_ttl")]
    pub subject_key_cache_ttl_secs: u64,

    /// Key versions kept cached when retiring (`keep_latest`).
    #[serde(default = "default_key_retention")]
    pub key_retention: u32,

    /// Automatic rotation interval in seconds. Unset disables the task.
    #[serde(default)]
    pub key_rotation_interval_secs: Option<u64>,

    /// Random-data passes for secure overwrite.
    #[serde(default = "default_overwrite_passes")]
    pub overwrite_passes: u32,

    /// Final overwrite pass writes a tombstone instead of nulling the field.
    #[serde(default = "default_overwrite_tombstone")]
    pub overwrite_tombstone: bool,

    /// Fraction of deletion targets re-checked after deletion, in `(0, 1]`.
    #[serde(default = "default_verification_sample_rate")]
    pub verification_sample_rate: f64,

    /// Validity window of deletion certificates, in days.
    #[serde(default = "default_certificate_validity_days")]
    pub certificate_validity_days: i64,

    /// Secret for HMAC-signing audit events. Events stay unsigned without it.
    #[serde(default)]
    pub audit_signing_secret: Option<Secret>,

    /// Secret for signing deletion certificates. Derived from the master key
    /// when absent.
    #[serde(default)]
    pub certificate_signing_secret: Option<Secret>,

    /// Port the HTTP(S) server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// PEM certificate chain. TLS is enabled when both paths are set.
    #[serde(default)]
    pub tls_cert_path: Option<String>,

    /// PEM private key.
    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// OTLP endpoint. Spans are only exported when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_active_key_version() -> u32 {
    1
}
fn default_kdf_time_cost() -> u32 {
    3
}
fn default_kdf_memory_kib() -> u32 {
    19_456
}
fn default_search_hash_iterations() -> u32 {
    100_000
}
fn default_country_code() -> String {
    "1".into()
}
fn default_max_search_tokens() -> usize {
    64
}
fn default_partial_search_fields() -> String {
    "first_name,last_name,email".into()
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_cache_purge_interval() -> u64 {
    60
}
fn default_subject_key_cache_capacity() -> usize {
    4_096
}
fn default_subject_key_cache_ttl() -> u64 {
    300
}
fn default_key_retention() -> u32 {
    3
}
fn default_overwrite_passes() -> u32 {
    3
}
fn default_overwrite_tombstone() -> bool {
    true
}
fn default_verification_sample_rate() -> f64 {
    0.1
}
fn default_certificate_validity_days() -> i64 {
    2557
}
fn default_listen_port() -> u16 {
    8443
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Field types configured for partial-match tokens.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown field type.
    pub fn partial_search_field_types(&self) -> Result<Vec<FieldType>> {
        self.partial_search_fields
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<FieldType>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("PARTIAL_SEARCH_FIELDS is invalid")
    }

    /// Whether both TLS paths are configured.
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.master_secret.expose().chars().count() < MIN_MASTER_SECRET_LEN {
            anyhow::bail!("MASTER_SECRET must be at least {MIN_MASTER_SECRET_LEN} characters");
        }
        ensure_non_empty(&self.install_id, "INSTALL_ID")?;
        ensure_non_empty(&self.default_country_code, "DEFAULT_COUNTRY_CODE")?;

        if !self.default_country_code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("DEFAULT_COUNTRY_CODE must contain digits only");
        }
        if self.active_key_version == 0 {
            anyhow::bail!("ACTIVE_KEY_VERSION must be >= 1");
        }
        if self.kdf_time_cost == 0 {
            anyhow::bail!("KDF_TIME_COST must be > 0");
        }
        if self.kdf_memory_kib < 8 {
            anyhow::bail!("KDF_MEMORY_KIB must be >= 8");
        }
        if self.search_hash_iterations == 0 {
            anyhow::bail!("SEARCH_HASH_ITERATIONS must be > 0");
        }
        if self.cache_capacity == 0 {
            anyhow::bail!("CACHE_CAPACITY must be > 0");
        }
        if self.cache_ttl_secs == 0 || self.cache_purge_interval_secs == 0 {
            anyhow::bail!("CACHE_TTL_SECS and CACHE_PURGE_INTERVAL_SECS must be > 0");
        }
        if self.subject_key_cache_ttl_secs == 0 {
            anyhow::bail!("SUBJECT_KEY_CACHE_TTL_SECS must be > 0");
        }
        if self.key_retention == 0 {
            anyhow::bail!("KEY_RETENTION must be > 0");
        }
        if self.key_rotation_interval_secs == Some(0) {
            anyhow::bail!("KEY_ROTATION_INTERVAL_SECS must be > 0 when set");
        }
        if self.overwrite_passes == 0 {
            anyhow::bail!("OVERWRITE_PASSES must be > 0");
        }
        if !(self.verification_sample_rate > 0.0 && self.verification_sample_rate <= 1.0) {
            anyhow::bail!("VERIFICATION_SAMPLE_RATE must be in (0, 1]");
        }
        if self.certificate_validity_days <= 0 {
            anyhow::bail!("CERTIFICATE_VALIDITY_DAYS must be > 0");
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together");
        }
        self.partial_search_field_types()?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> Config {
        Config {
            master_secret: Secret::new("correct horse battery staple, twice over"),
            install_id: "install-test".into(),
            active_key_version: default_active_key_version(),
            kdf_time_cost: 1,
            kdf_memory_kib: 64,
            search_hash_iterations: 10,
            default_country_code: default_country_code(),
            max_search_tokens: default_max_search_tokens(),
            partial_search_fields: default_partial_search_fields(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: 16,
            cache_purge_interval_secs: default_cache_purge_interval(),
            subject_key_cache_capacity: 16,
            subject_key_cache_ttl_secs: default_subject_key_cache_ttl(),
            key_retention: default_key_retention(),
            key_rotation_interval_secs: None,
            overwrite_passes: default_overwrite_passes(),
            overwrite_tombstone: default_overwrite_tombstone(),
            verification_sample_rate: 1.0,
            certificate_validity_days: default_certificate_validity_days(),
            audit_signing_secret: None,
            certificate_signing_secret: None,
            listen_port: default_listen_port(),
            tls_cert_path: None,
            tls_key_path: None,
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_active_key_version(), 1);
        assert_eq!(default_kdf_time_cost(), 3);
        assert_eq!(default_search_hash_iterations(), 100_000);
        assert_eq!(default_cache_ttl(), 300);
        assert_eq!(default_subject_key_cache_capacity(), 4_096);
        assert_eq!(default_overwrite_passes(), 3);
        assert_eq!(default_certificate_validity_days(), 2557);
        assert_eq!(default_listen_port(), 8443);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_master_secret() {
        let cfg = Config {
            master_secret: Secret::new("too short"),
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_install_id() {
        let cfg = Config {
            install_id: "  ".into(),
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_sample_rate() {
        let cfg = Config {
            verification_sample_rate: 0.0,
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            verification_sample_rate: 1.5,
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_half_configured_tls() {
        let cfg = Config {
            tls_cert_path: Some("/run/tls.crt".into()),
            ..valid_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_fields_parse() {
        let cfg = Config {
            partial_search_fields: "first_name, email".into(),
            ..valid_config()
        };
        assert_eq!(
            cfg.partial_search_field_types().unwrap(),
            vec![FieldType::FirstName, FieldType::Email]
        );
        let bad = Config {
            partial_search_fields: "first_name,nickname".into(),
            ..valid_config()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let cfg = valid_config();
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("battery staple"));
    }
}
