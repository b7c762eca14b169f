use std::str::FromStr;

use tracing::warn;

pub const USERS_LIST_KEY: &str = "users_list";
pub const GROUPS_LIST_KEY: &str = "groups_list";
pub const FEED_KEY: &str = "feed";
pub const CACHE_PREFIX: &str = "cache:";

pub const POST_TITLE_LENGTH: usize = 15;
pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_GROUP_TITLE_LENGTH: usize = 200;

/// Upper bounds for durations read from the environment; chrono panics past
/// its own range long before `i64::MAX`.
pub const MAX_SESSION_HOURS: i64 = 24 * 365;
pub const MAX_INDEX_CACHE_SECONDS: i64 = 24 * 3600;

/// Runtime settings, read once per process (or once per request under Spin).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub session_hours: i64,
    /// Lifetime of a cached index page. Zero disables the cache.
    pub index_cache_seconds: i64,
    pub posts_per_page: usize,
    pub max_upload_bytes: u64,
    pub seed_demo_data: bool,
    /// Spin key-value store label.
    pub kv_store: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:80".to_string(),
            session_hours: 24,
            index_cache_seconds: 20,
            posts_per_page: 10,
            max_upload_bytes: 5 * 1024 * 1024,
            seed_demo_data: false,
            kv_store: "default".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("YATUBE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            session_hours: env_or("YATUBE_SESSION_HOURS", defaults.session_hours).clamp(1, MAX_SESSION_HOURS),
            index_cache_seconds: env_or("YATUBE_INDEX_CACHE_SECONDS", defaults.index_cache_seconds)
                .clamp(0, MAX_INDEX_CACHE_SECONDS),
            posts_per_page: env_or("YATUBE_POSTS_PER_PAGE", defaults.posts_per_page).max(1),
            max_upload_bytes: env_or("YATUBE_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            seed_demo_data: env_or("YATUBE_SEED_DEMO", defaults.seed_demo_data),
            kv_store: std::env::var("YATUBE_KV_STORE").unwrap_or(defaults.kv_store),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "ignoring invalid configuration value");
            default
        }),
        Err(_) => default,
    }
}

pub fn user_key(username: &str) -> String {
    format!("user:{}", username)
}

pub fn group_key(slug: &str) -> String {
    format!("group:{}", slug)
}

pub fn post_key(id: u64) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: u64) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: u64) -> String {
    format!("comments:{}", post_id)
}

pub fn followings_key(username: &str) -> String {
    format!("followings:{}", username)
}

pub fn followers_key(username: &str) -> String {
    format!("followers:{}", username)
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

pub fn user_sessions_key(username: &str) -> String {
    format!("sessions:{}", username)
}

pub fn sequence_key(kind: &str) -> String {
    format!("seq:{}", kind)
}

pub fn media_key(path: &str) -> String {
    format!("media:{}", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.posts_per_page, 10);
        assert_eq!(config.index_cache_seconds, 20);
        assert_eq!(config.session_hours, 24);
        assert_eq!(config.kv_store, "default");
    }

    #[test]
    fn invalid_env_value_falls_back() {
        std::env::set_var("YATUBE_TEST_BOGUS_NUMBER", "ten");
        assert_eq!(env_or("YATUBE_TEST_BOGUS_NUMBER", 7usize), 7);
        std::env::set_var("YATUBE_TEST_BOGUS_NUMBER", " 12 ");
        assert_eq!(env_or("YATUBE_TEST_BOGUS_NUMBER", 7usize), 12);
    }

    #[test]
    fn durations_from_env_are_clamped() {
        std::env::set_var("YATUBE_SESSION_HOURS", "9223372036854775807");
        std::env::set_var("YATUBE_INDEX_CACHE_SECONDS", "-5");
        let config = Config::from_env();
        assert_eq!(config.session_hours, MAX_SESSION_HOURS);
        assert_eq!(config.index_cache_seconds, 0);

        std::env::set_var("YATUBE_SESSION_HOURS", "0");
        std::env::set_var("YATUBE_INDEX_CACHE_SECONDS", "9223372036854775807");
        let config = Config::from_env();
        assert_eq!(config.session_hours, 1);
        assert_eq!(config.index_cache_seconds, MAX_INDEX_CACHE_SECONDS);

        std::env::remove_var("YATUBE_SESSION_HOURS");
        std::env::remove_var("YATUBE_INDEX_CACHE_SECONDS");
    }
}
