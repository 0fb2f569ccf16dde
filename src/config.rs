use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use governor::Quota;

pub const TOKEN_VAR: &str = "VTSERVERLIST_TOKEN";
pub const CHANNEL_VAR: &str = "VTSERVERLIST_CHANNEL_ID";
pub const RATE_VAR: &str = "VTSERVERLIST_UPDATE_RATE";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    NotANumber(&'static str, String),
    OutOfRange(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "{} is not set", var),
            Self::NotANumber(var, value) => write!(f, "{} is not a number: {:?}", var, value),
            Self::OutOfRange(var, value) => write!(f, "{} is out of range: {:?}", var, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct Config {
    // Messaging
    pub token: String,
    pub channel_id: u64,
    pub discord_api: String,
    pub discord_rate_per_sec: u32,

    // Polling
    pub update_rate_minutes: f64,
    pub update_interval: Duration,
    pub servers_file: PathBuf,
    pub query_timeout_secs: u64,
    pub max_concurrent_queries: usize,
}

// Token is kept out of debug output.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("channel_id", &self.channel_id)
            .field("discord_api", &self.discord_api)
            .field("discord_rate_per_sec", &self.discord_rate_per_sec)
            .field("update_rate_minutes", &self.update_rate_minutes)
            .field("update_interval", &self.update_interval)
            .field("servers_file", &self.servers_file)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("max_concurrent_queries", &self.max_concurrent_queries)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let token = lookup(TOKEN_VAR)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing(TOKEN_VAR))?;

        let channel = lookup(CHANNEL_VAR).ok_or(ConfigError::Missing(CHANNEL_VAR))?;
        let channel_id = channel
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::NotANumber(CHANNEL_VAR, channel.clone()))?;

        let rate = lookup(RATE_VAR).ok_or(ConfigError::Missing(RATE_VAR))?;
        let update_rate_minutes = rate
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::NotANumber(RATE_VAR, rate.clone()))?;
        if !update_rate_minutes.is_finite() || update_rate_minutes <= 0.0 {
            return Err(ConfigError::OutOfRange(RATE_VAR, rate));
        }
        let update_interval = match Duration::try_from_secs_f64(update_rate_minutes * 60.0) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => return Err(ConfigError::OutOfRange(RATE_VAR, rate)),
        };

        Ok(Self {
            token: token.trim().to_string(),
            channel_id,
            update_rate_minutes,
            update_interval,

            servers_file: lookup("VTSERVERLIST_SERVERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("servers.cfg")),

            query_timeout_secs: lookup("VTSERVERLIST_QUERY_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(2),

            max_concurrent_queries: lookup("VTSERVERLIST_MAX_CONCURRENT_QUERIES")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(8)
                .max(1),

            discord_rate_per_sec: lookup("VTSERVERLIST_DISCORD_RATE_PER_SEC")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(5)
                .max(1),

            discord_api: lookup("VTSERVERLIST_DISCORD_API")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://discord.com/api/v10".to_string()),
        })
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn discord_quota(&self) -> Quota {
        Quota::per_second(NonZeroU32::new(self.discord_rate_per_sec).unwrap_or(NonZeroU32::MIN))
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
        move |key: &str| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![(TOKEN_VAR, "abc.def"), (CHANNEL_VAR, "1186901921567617115"), (RATE_VAR, "2.5")]
    }

    #[test]
    fn parses_required_values_and_defaults() {
        let config = Config::from_lookup(lookup_from(&required())).unwrap();
        assert_eq!(config.token, "abc.def");
        assert_eq!(config.channel_id, 1186901921567617115);
        assert_eq!(config.update_interval(), Duration::from_secs(150));
        assert_eq!(config.servers_file, PathBuf::from("servers.cfg"));
        assert_eq!(config.query_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_concurrent_queries, 8);
        assert_eq!(config.discord_api, "https://discord.com/api/v10");
    }

    #[test]
    fn missing_token_is_reported() {
        let pairs = vec![(CHANNEL_VAR, "1"), (RATE_VAR, "1")];
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing(TOKEN_VAR));
        assert_eq!(err.to_string(), "VTSERVERLIST_TOKEN is not set");
    }

    #[test]
    fn channel_must_be_numeric() {
        let mut pairs = required();
        pairs[1] = (CHANNEL_VAR, "general");
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::NotANumber(CHANNEL_VAR, _)));
    }

    #[test]
    fn rate_must_be_positive() {
        for bad in ["0", "-1", "NaN", "inf", "1e20", "1e-300"] {
            let mut pairs = required();
            pairs[2] = (RATE_VAR, bad);
            let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange(RATE_VAR, _)), "{}", bad);
        }

        let mut pairs = required();
        pairs[2] = (RATE_VAR, "soon");
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::NotANumber(RATE_VAR, _)));
    }

    #[test]
    fn optional_values_override_defaults() {
        let mut pairs = required();
        pairs.push(("VTSERVERLIST_SERVERS_FILE", "/etc/vt/servers.cfg"));
        pairs.push(("VTSERVERLIST_MAX_CONCURRENT_QUERIES", "0"));
        pairs.push(("VTSERVERLIST_DISCORD_API", "http://127.0.0.1:9000/api/"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.servers_file, PathBuf::from("/etc/vt/servers.cfg"));
        assert_eq!(config.max_concurrent_queries, 1);
        assert_eq!(config.discord_api, "http://127.0.0.1:9000/api");
    }
}
