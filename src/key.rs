//! API key discovery.
//!
//! The key is looked up once per run, from the first source that yields one:
//!
//! 1. an explicit flag value,
//! 2. the `GANDI_API_KEY` environment variable,
//! 3. the gandi CLI's own config file (`~/.config/gandi/config.yaml`).

use std::{env, fmt, fs};

use crate::{
    error::{Error, Result},
    util::invoking_user_home,
};

const API_KEY_ENV: &str = "GANDI_API_KEY";

/// An opaque API credential.
///
/// Immutable once resolved; all API calls borrow it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Resolve the key, preferring an explicit `flag` value over the
    /// environment over the gandi CLI config.
    pub fn resolve(flag: Option<&str>) -> Result<ApiKey> {
        Self::from_sources(
            flag,
            env::var(API_KEY_ENV).ok().as_deref(),
            Self::cli_config_key().as_deref(),
        )
    }

    fn from_sources(
        flag: Option<&str>,
        env_key: Option<&str>,
        cli_key: Option<&str>,
    ) -> Result<ApiKey> {
        if let Some(key) = flag.filter(|key| !key.is_empty()) {
            log::debug!("Using api key from flag");
            return Ok(ApiKey(key.to_owned()));
        }

        // only accept environment values that look like a platform api key
        if let Some(key) = env_key.filter(|key| looks_like_api_key(key)) {
            log::debug!("Using api key from ${API_KEY_ENV}");
            return Ok(ApiKey(key.to_owned()));
        }

        if let Some(key) = cli_key.filter(|key| !key.is_empty()) {
            log::debug!("Using api key from the gandi cli config");
            return Ok(ApiKey(key.to_owned()));
        }

        Err(Error::Config(format!(
            "api key is missing; couldn't find one from the gandi cli, \
             the environment (${API_KEY_ENV}), nor --api-key"
        )))
    }

    /// Got the CLI? Grab its key (<https://cli.gandi.net>).
    fn cli_config_key() -> Option<String> {
        let path = invoking_user_home().join(".config/gandi/config.yaml");
        let config = fs::read_to_string(path).ok()?;
        parse_cli_config(&config)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// never log the key itself
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

fn looks_like_api_key(key: &str) -> bool {
    key.len() == 24 && key.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Extracts `api: / key:` from the CLI's YAML config. Only that one field is
/// read, line by line.
fn parse_cli_config(config: &str) -> Option<String> {
    let mut in_api_block = false;

    for line in config.lines() {
        if !line.starts_with([' ', '\t']) {
            in_api_block = line.trim_end() == "api:";
            continue;
        }

        if !in_api_block {
            continue;
        }

        if let Some(value) = line.trim_start().strip_prefix("key:") {
            let value = value.trim().trim_matches(['"', '\'']);
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "AAAAAAAAAAAAAAAAAAAAAAAA";

    #[test]
    fn resolution_precedence() {
        const ENV_KEY: &str = "BBBBBBBBBBBBBBBBBBBBBBBB";

        // flag wins over a well-formed environment key
        let key = ApiKey::from_sources(Some(WELL_FORMED), Some(ENV_KEY), None).unwrap();
        assert_eq!(key.as_str(), WELL_FORMED);

        // no flag: environment key is used
        let key = ApiKey::from_sources(None, Some(ENV_KEY), None).unwrap();
        assert_eq!(key.as_str(), ENV_KEY);

        // malformed environment keys are ignored in favor of the cli config
        let key = ApiKey::from_sources(None, Some("not-an-api-key"), Some("abc123")).unwrap();
        assert_eq!(key.as_str(), "abc123");

        // all sources exhausted
        assert!(matches!(
            ApiKey::from_sources(None, Some("not-an-api-key"), None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ApiKey::from_sources(None, None, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn key_format() {
        assert!(looks_like_api_key(WELL_FORMED));
        assert!(looks_like_api_key("abc123abc123abc123abc123"));
        assert!(!looks_like_api_key("short"));
        assert!(!looks_like_api_key("with-punctuation-1234567"));
    }

    #[test]
    fn cli_config_parsing() {
        let config = "core:\n  default: x\napi:\n  host: https://rpc.gandi.net/xmlrpc/\n  key: abc123\n";
        assert_eq!(parse_cli_config(config).as_deref(), Some("abc123"));

        // key under another block is not the api key
        let config = "other:\n  key: nope\napi:\n  host: h\n";
        assert_eq!(parse_cli_config(config), None);
    }

    #[test]
    fn debug_is_redacted() {
        let key = ApiKey(WELL_FORMED.to_owned());
        assert_eq!(format!("{key:?}"), "ApiKey(..)");
    }
}
