use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, loaded from the environment with `.env` support.
#[derive(Debug, Clone)]
pub struct Config {
    /// User-Agent sent on every fetch.
    pub user_agent: String,
    /// Consecutive failed scans before a feed is disabled.
    pub max_errors: i64,
    /// Redirect hops followed per fetch before giving up.
    pub max_redirects: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Candidate links collected per feed type during discovery.
    pub max_feeds: usize,
    /// Rows buffered before a bulk insert is issued.
    pub max_bulk_create: usize,
    pub database_url: String,
}

pub const DEFAULT_USER_AGENT: &str = concat!("feedpress/", env!("CARGO_PKG_VERSION"));

impl Default for Config {
    fn default() -> Self {
        Config {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_errors: 5,
            max_redirects: 3,
            timeout: Duration::from_secs_f64(5.0),
            max_feeds: 5,
            max_bulk_create: 100,
            database_url: "sqlite://feedpress.db?mode=rwc".to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from environment variables, falling back to
    /// the defaults above. Unparseable values fall back too.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();
        Config {
            user_agent: env::var("USER_AGENT").unwrap_or(defaults.user_agent),
            max_errors: parsed_var("MAX_ERRORS", defaults.max_errors),
            max_redirects: parsed_var("MAX_REDIRECTS", defaults.max_redirects),
            timeout: Duration::from_secs_f64(parsed_var(
                "TIMEOUT",
                defaults.timeout.as_secs_f64(),
            )),
            max_feeds: parsed_var("MAX_FEEDS", defaults.max_feeds),
            max_bulk_create: parsed_var("MAX_BULK_CREATE", defaults.max_bulk_create),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        }
    }
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.max_errors, 5);
        assert_eq!(config.max_redirects, 3);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_feeds, 5);
        assert_eq!(config.max_bulk_create, 100);
        assert!(config.user_agent.starts_with("feedpress/"));
    }

    #[test]
    fn unset_and_unparseable_values_fall_back_to_the_default() {
        assert_eq!(parsed_var("FEEDPRESS_TEST_UNSET_KEY", 42_i64), 42);
    }
}
