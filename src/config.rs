use std::time::Duration;

/// Tunables named in the external interfaces: cache sizing/timeout, the
/// response size ceiling enforced on description and Browse downloads, the
/// pagination retry budget, and how long one discovery round waits for
/// M-SEARCH responses. Defaults match the reference values; each is
/// overridable through its own environment variable.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub cache_size: usize,
    pub cache_timeout: Duration,
    pub max_content_length: usize,
    pub max_browse_retries: u8,
    pub discovery_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 1024,
            cache_timeout: Duration::from_secs(60),
            max_content_length: 1_048_576,
            max_browse_retries: 2,
            discovery_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Builds a `Config` from defaults, overriding any field whose
    /// environment variable is set and parses.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("UPNP_CP_CACHE_SIZE") {
            config.cache_size = v;
        }
        if let Some(v) = env_u64("UPNP_CP_CACHE_TIMEOUT_SECS") {
            config.cache_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_usize("UPNP_CP_MAX_CONTENT_LENGTH") {
            config.max_content_length = v;
        }
        if let Some(v) = env_usize("UPNP_CP_MAX_BROWSE_RETRIES") {
            config.max_browse_retries = v as u8;
        }
        if let Some(v) = env_u64("UPNP_CP_DISCOVERY_TIMEOUT_SECS") {
            config.discovery_timeout = Duration::from_secs(v);
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tunables() {
        let config = Config::default();
        assert_eq!(config.cache_size, 1024);
        assert_eq!(config.cache_timeout, Duration::from_secs(60));
        assert_eq!(config.max_content_length, 1_048_576);
        assert_eq!(config.max_browse_retries, 2);
    }
}
