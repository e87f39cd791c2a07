//! Link validation configuration.
//!
//! The configuration is YAML with unknown fields rejected. Empty input
//! yields the permissive default configuration. Duration fields use the
//! `Ns|Nm|Nh|Nd` notation; content loaded from a path supports `$(VAR)`
//! environment variable substitution.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{CheckError, Result};

/// Default validity window for cached URLs: five days.
pub const DEFAULT_CACHE_VALIDITY: &str = "120h";

/// Trait for abstracting environment variable access, so substitution can be
/// exercised hermetically in tests.
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use.
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\((?P<var>[a-zA-Z_]+[a-zA-Z0-9_]*)\)").expect("static pattern")
});

/// Substitute `$(VAR)` occurrences with environment values. Unset variables
/// substitute to the empty string.
pub fn substitute_env_vars(content: &str, env: &dyn EnvProvider) -> String {
    ENV_VAR_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            env.get(&caps["var"]).unwrap_or_default()
        })
        .into_owned()
}

/// Supported validator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ValidatorType {
    #[serde(rename = "roundtrip")]
    RoundTrip,
    #[serde(rename = "githubPullsIssues")]
    GitHubPullsIssues,
    #[serde(rename = "ignore")]
    Ignore,
}

/// One validator entry: the first entry whose regex matches a destination
/// is selected.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ValidatorSpec {
    /// Regex matched against the link destination. For `githubPullsIssues`
    /// this must be
    /// `(^http[s]?:\/\/)(www\.)?(github\.com\/){ORG}\/{REPO}(\/pull\/|\/issues\/)`.
    pub regex: String,
    /// Validator kind; `roundtrip` performs an HTTP GET.
    #[serde(rename = "type")]
    pub kind: Option<ValidatorType>,
    /// GitHub token to avoid getting rate limited during the preflight.
    pub token: Option<String>,
}

/// Cache section of the validate configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// `sqlite`, `none` or empty (no caching).
    #[serde(rename = "type")]
    pub kind: String,
    pub validity: String,
    pub jitter: String,

    #[serde(skip)]
    validity_parsed: Option<Duration>,
    #[serde(skip)]
    jitter_parsed: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            validity: DEFAULT_CACHE_VALIDITY.to_string(),
            jitter: String::new(),
            validity_parsed: None,
            jitter_parsed: None,
        }
    }
}

impl CacheConfig {
    /// Whether a persistent cache backend is configured.
    pub fn is_set(&self) -> bool {
        self.kind == "sqlite"
    }

    pub fn validity(&self) -> Duration {
        self.validity_parsed.unwrap_or(Duration::ZERO)
    }

    pub fn jitter(&self) -> Duration {
        self.jitter_parsed.unwrap_or(Duration::ZERO)
    }
}

/// Top-level link validation configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ValidateConfig {
    pub version: u64,

    pub cache: CacheConfig,

    /// When set, local destinations are also dispatched through the
    /// validator registry instead of being checked directly.
    #[serde(rename = "explicitLocalValidators")]
    pub explicit_local_validators: bool,
    pub validators: Vec<ValidatorSpec>,
    pub timeout: String,
    pub parallelism: i64,
    /// Per-host connection ceiling; `None` means unlimited. An `Option` so a
    /// zero value can be told apart from a not-present configuration.
    pub host_max_conns: Option<usize>,
    pub random_delay: String,

    #[serde(skip)]
    timeout_parsed: Option<Duration>,
    #[serde(skip)]
    random_delay_parsed: Option<Duration>,
}

impl ValidateConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_parsed
    }

    pub fn random_delay(&self) -> Option<Duration> {
        self.random_delay_parsed
    }
}

/// Parse validate configuration from YAML content. Empty content yields the
/// default (permissive) configuration.
pub fn parse_config(content: &str) -> Result<ValidateConfig> {
    if content.trim().is_empty() {
        return Ok(ValidateConfig::default());
    }

    let mut cfg: ValidateConfig = serde_yaml::from_str(content)
        .map_err(|e| CheckError::Config(format!("parsing YAML content {:?}: {}", content, e)))?;

    if !cfg.timeout.is_empty() {
        cfg.timeout_parsed = Some(
            parse_duration(&cfg.timeout)
                .map_err(|e| CheckError::Config(format!("parsing timeout duration: {}", e)))?,
        );
    }
    if !cfg.random_delay.is_empty() {
        cfg.random_delay_parsed = Some(
            parse_duration(&cfg.random_delay)
                .map_err(|e| CheckError::Config(format!("parsing random delay duration: {}", e)))?,
        );
    }
    if cfg.parallelism < 0 {
        return Err(CheckError::Config(
            "parsing parallelism, has to be > 0".to_string(),
        ));
    }

    match cfg.cache.kind.as_str() {
        "sqlite" => {
            if !cfg.cache.validity.is_empty() {
                cfg.cache.validity_parsed = Some(parse_duration(&cfg.cache.validity).map_err(
                    |e| CheckError::Config(format!("parsing cache validity duration: {}", e)),
                )?);
            }
            if !cfg.cache.jitter.is_empty() {
                cfg.cache.jitter_parsed = Some(parse_duration(&cfg.cache.jitter).map_err(|e| {
                    CheckError::Config(format!("parsing cache jitter duration: {}", e))
                })?);
            }
        }
        "none" | "" => {}
        other => {
            return Err(CheckError::Config(format!(
                "unsupported cache type {:?}",
                other
            )));
        }
    }

    for v in &cfg.validators {
        if v.kind.is_none() {
            return Err(CheckError::Config(format!(
                "validator type not supported for regex {:?}",
                v.regex
            )));
        }
    }

    Ok(cfg)
}

/// Parse a duration string composed of `<int><unit>` segments, where unit is
/// one of `ms`, `s`, `m`, `h`, `d`. Compound values such as `1h30m` are
/// accepted.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {:?}", s))?;
        if digits_end == 0 {
            return Err(format!("invalid duration {:?}", s));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", s))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];
        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            "d" => Duration::from_secs(value * 86400),
            other => return Err(format!("unknown duration unit {:?} in {:?}", other, s)),
        };
        rest = &rest[unit_end..];
    }
    Ok(total)
}
