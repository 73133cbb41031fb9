use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::node::FlagMap;
use crate::provider::ProviderConfig;

/// Environment variable overriding the provider cache max-age, in seconds
pub const CACHE_MAXAGE_ENV: &str = "SUBFORGE_PROVIDER_CACHE_MAXAGE";

pub const DEFAULT_PROVIDER_CACHE_MAXAGE_SECS: u64 = 10 * 60;

/// The complete configuration file structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Provider definitions, kept raw until a provider is constructed
    #[serde(default)]
    pub providers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub surge_config: SurgeConfig,
    #[serde(default)]
    pub surfboard_config: SurfboardConfig,
    #[serde(default)]
    pub bin_path: BinPath,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_cache_maxage")]
    pub provider_cache_maxage_secs: u64,
    /// Extra flag keywords, consulted before the built-in table
    #[serde(default)]
    pub flags: BTreeMap<String, FlagKeywords>,
}

fn default_cache_maxage() -> u64 {
    DEFAULT_PROVIDER_CACHE_MAXAGE_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            surge_config: SurgeConfig::default(),
            surfboard_config: SurfboardConfig::default(),
            bin_path: BinPath::default(),
            cache: CacheConfig::default(),
            provider_cache_maxage_secs: DEFAULT_PROVIDER_CACHE_MAXAGE_SECS,
            flags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SurgeConfig {
    /// Resolve node hostnames and attach the addresses to each node
    pub resolve_hostname: bool,
    pub vmess_aead: bool,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            resolve_hostname: false,
            vmess_aead: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SurfboardConfig {
    pub vmess_aead: bool,
}

impl Default for SurfboardConfig {
    fn default() -> Self {
        Self { vmess_aead: true }
    }
}

/// Executables for protocols served by an external client process
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BinPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadowsocksr: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// In-process map
    #[default]
    Default,
    Redis,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(default, rename = "type")]
    pub cache_type: CacheType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

/// A single keyword or a list of keywords
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagKeywords {
    One(String),
    Many(Vec<String>),
}

impl FlagKeywords {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            FlagKeywords::One(k) => vec![k.clone()],
            FlagKeywords::Many(list) => list.clone(),
        }
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Strip `//` and `/* */` comments outside of string literals
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                // Keep the newline so line numbers in parse errors stay right
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    if nc == '\n' {
                        out.push('\n');
                    }
                    prev = nc;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let stripped = strip_jsonc_comments(content);
    serde_json::from_str(&stripped).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Validate a parsed configuration, including every provider definition
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(ref bin) = config.bin_path.shadowsocksr {
        if !bin.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "bin-path.shadowsocksr must be an absolute path, got '{}'",
                bin.display()
            )));
        }
    }

    if config.cache.cache_type == CacheType::Redis {
        let raw = config.cache.redis_url.as_deref().ok_or_else(|| {
            ConfigError::Invalid("cache.redis-url is required when cache.type is redis".to_string())
        })?;
        let parsed = url::Url::parse(raw)
            .map_err(|e| ConfigError::Invalid(format!("cache.redis-url '{}': {}", raw, e)))?;
        if !matches!(parsed.scheme(), "redis" | "rediss") {
            return Err(ConfigError::Invalid(format!(
                "cache.redis-url must use the redis:// or rediss:// scheme, got '{}'",
                raw
            )));
        }
    }

    if config.provider_cache_maxage_secs == 0 {
        return Err(ConfigError::Invalid(
            "provider-cache-maxage-secs must be greater than zero".to_string(),
        ));
    }

    config.flag_map()?;

    for name in config.providers.keys() {
        config.provider_config(name)?;
    }

    Ok(())
}

impl AppConfig {
    /// Parse and validate from a JSONC string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config = parse_config(content)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(CACHE_MAXAGE_ENV) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("{} must be a positive number of seconds, got '{}'", CACHE_MAXAGE_ENV, raw))
                })?;
            self.provider_cache_maxage_secs = secs;
        }
        Ok(())
    }

    /// Parse and validate the named provider definition
    pub fn provider_config(&self, name: &str) -> Result<ProviderConfig, ConfigError> {
        let raw = self
            .providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))?;

        ProviderConfig::from_value(raw.clone()).map_err(|source| ConfigError::Provider {
            name: name.to_string(),
            source,
        })
    }

    /// Flag table with the configured keywords in front
    pub fn flag_map(&self) -> Result<FlagMap, ConfigError> {
        let custom: BTreeMap<String, Vec<String>> = self
            .flags
            .iter()
            .map(|(emoji, words)| (emoji.clone(), words.to_vec()))
            .collect();

        FlagMap::with_custom(&custom).map_err(|e| ConfigError::Invalid(format!("flags: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_comments() {
        let input = "{\n  // comment\n  \"key\": \"value\"\n}";
        let result = strip_jsonc_comments(input);
        assert!(!result.contains("comment"));
        assert!(result.contains("\"key\": \"value\""));
        assert_eq!(result.lines().count(), input.lines().count());
    }

    #[test]
    fn test_strip_block_comments() {
        let input = r#"{ /* block */ "key": "value" }"#;
        let result = strip_jsonc_comments(input);
        assert_eq!(result, r#"{  "key": "value" }"#);
    }

    #[test]
    fn test_preserve_strings_with_comment_like_content() {
        let input = r#"{"url": "http://example.com/*x*/", "esc": "a\"//b"}"#;
        assert_eq!(strip_jsonc_comments(input), input);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_str("{}").unwrap();
        assert!(!config.surge_config.resolve_hostname);
        assert!(config.surge_config.vmess_aead);
        assert!(config.surfboard_config.vmess_aead);
        assert_eq!(config.cache.cache_type, CacheType::Default);
        assert_eq!(config.provider_cache_maxage_secs, DEFAULT_PROVIDER_CACHE_MAXAGE_SECS);
        assert!(config.bin_path.shadowsocksr.is_none());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = AppConfig::from_str(
            r#"{
                // only one key in the section
                "surge-config": { "resolve-hostname": true }
            }"#,
        )
        .unwrap();
        assert!(config.surge_config.resolve_hostname);
        assert!(config.surge_config.vmess_aead);
    }

    #[test]
    fn test_redis_requires_url() {
        let result = AppConfig::from_str(r#"{"cache": {"type": "redis"}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = AppConfig::from_str(r#"{"cache": {"type": "redis", "redis-url": "http://x"}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config =
            AppConfig::from_str(r#"{"cache": {"type": "redis", "redis-url": "redis://127.0.0.1:6379"}}"#)
                .unwrap();
        assert_eq!(config.cache.cache_type, CacheType::Redis);
    }

    #[test]
    fn test_unknown_cache_type_is_rejected() {
        let result = AppConfig::from_str(r#"{"cache": {"type": "memcached"}}"#);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_bin_path_must_be_absolute() {
        let result = AppConfig::from_str(r#"{"bin-path": {"shadowsocksr": "bin/ssr-local"}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config =
            AppConfig::from_str(r#"{"bin-path": {"shadowsocksr": "/usr/bin/ssr-local"}}"#).unwrap();
        assert_eq!(
            config.bin_path.shadowsocksr,
            Some(PathBuf::from("/usr/bin/ssr-local"))
        );
    }

    #[test]
    fn test_env_override() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| (key == CACHE_MAXAGE_ENV).then(|| "30".to_string()))
            .unwrap();
        assert_eq!(config.provider_cache_maxage_secs, 30);

        let result = config.apply_env_overrides(|_| Some("soon".to_string()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        config.apply_env_overrides(|_| None).unwrap();
        assert_eq!(config.provider_cache_maxage_secs, 30);
    }

    #[test]
    fn test_flags_accept_string_or_list() {
        let config = AppConfig::from_str(
            r#"{"flags": {"🇺🇳": "Relay", "🇦🇶": ["/^Ice/", "Polar"]}}"#,
        )
        .unwrap();
        let flags = config.flag_map().unwrap();
        assert_eq!(flags.lookup("Relay 01"), Some("🇺🇳"));
        assert_eq!(flags.lookup("Iceberg"), Some("🇦🇶"));

        let result = AppConfig::from_str(r#"{"flags": {"🇺🇳": "/(/"}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_flag_keyword_fails_validation() {
        let result = AppConfig::from_str(r#"{"flags": {"🇺🇸": [""]}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_provider_fails_validation() {
        let result = AppConfig::from_str(
            r#"{"providers": {"bad": {"type": "blackssl", "url": "https://example.com"}}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Provider { ref name, .. }) if name == "bad"));
    }

    #[test]
    fn test_provider_lookup() {
        let config = AppConfig::from_str(
            r#"{"providers": {"demo": {"type": "custom", "node-list": []}}}"#,
        )
        .unwrap();
        assert!(config.provider_config("demo").is_ok());
        assert!(matches!(
            config.provider_config("missing"),
            Err(ConfigError::UnknownProvider(_))
        ));
    }
}
