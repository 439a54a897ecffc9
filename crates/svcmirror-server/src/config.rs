//! Mirror Configuration
//!
//! Runtime settings for the store session and the synchronization actor, with
//! environment variable overrides.

use crate::sync::SyncOptions;
use std::time::Duration;

/// Mirror configuration with sensible defaults
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    // Store connection
    /// Coordination-store servers (env: SVCMIRROR_SERVERS, comma-separated)
    pub servers: Vec<String>,

    /// Session timeout requested from the store (env: SVCMIRROR_SESSION_TIMEOUT_SECS)
    pub session_timeout: Duration,

    /// Tree root the services layout lives under (env: SVCMIRROR_ROOT)
    pub root: String,

    // Sync behavior
    /// Re-fetch payloads of already known instances (env: SVCMIRROR_REFRESH_KNOWN_NODES)
    pub refresh_known_nodes: bool,

    /// Drop cached entries missing upstream on resync (env: SVCMIRROR_PURGE_ON_RESYNC)
    pub purge_on_resync: bool,

    /// Delay before re-establishing a failed watch (env: SVCMIRROR_RECONNECT_DELAY_SECS)
    pub reconnect_delay: Duration,

    // Connect backoff
    /// Initial interval for connection retry
    pub backoff_initial: Duration,

    /// Maximum interval for connection retry
    pub backoff_max: Duration,

    /// Maximum elapsed time for connection retries
    pub backoff_max_elapsed: Duration,

    /// Multiplier for connection backoff
    pub backoff_multiplier: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            servers: vec!["notexists:2181".to_string()],
            session_timeout: Duration::from_secs(60),
            root: "/".to_string(),

            refresh_known_nodes: false,
            purge_on_resync: false,
            reconnect_delay: Duration::from_secs(5),

            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            backoff_max_elapsed: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl SyncConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    /// Unparseable values are ignored and leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(servers) = lookup("SVCMIRROR_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !servers.is_empty() {
                config.servers = servers;
            }
        }

        if let Some(secs) = lookup("SVCMIRROR_SESSION_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.session_timeout = Duration::from_secs(parsed);
            }
        }

        if let Some(root) = lookup("SVCMIRROR_ROOT") {
            config.root = root;
        }

        if let Some(flag) = lookup("SVCMIRROR_REFRESH_KNOWN_NODES") {
            if let Some(parsed) = parse_flag(&flag) {
                config.refresh_known_nodes = parsed;
            }
        }

        if let Some(flag) = lookup("SVCMIRROR_PURGE_ON_RESYNC") {
            if let Some(parsed) = parse_flag(&flag) {
                config.purge_on_resync = parsed;
            }
        }

        if let Some(secs) = lookup("SVCMIRROR_RECONNECT_DELAY_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.reconnect_delay = Duration::from_secs(parsed);
            }
        }

        config
    }

    /// Actor options derived from this configuration
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            refresh_known_nodes: self.refresh_known_nodes,
            purge_on_resync: self.purge_on_resync,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.servers, vec!["notexists:2181"]);
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.root, "/");
        assert!(!config.refresh_known_nodes);
        assert!(!config.purge_on_resync);
        assert_eq!(SyncConfig::from_lookup(|_| None), config);
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("SVCMIRROR_SERVERS", "zk1:2181, zk2:2181"),
            ("SVCMIRROR_SESSION_TIMEOUT_SECS", "30"),
            ("SVCMIRROR_ROOT", "/nerve"),
            ("SVCMIRROR_REFRESH_KNOWN_NODES", "true"),
            ("SVCMIRROR_PURGE_ON_RESYNC", "1"),
            ("SVCMIRROR_RECONNECT_DELAY_SECS", "2"),
        ]));
        assert_eq!(config.servers, vec!["zk1:2181", "zk2:2181"]);
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.root, "/nerve");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));

        let options = config.sync_options();
        assert!(options.refresh_known_nodes);
        assert!(options.purge_on_resync);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("SVCMIRROR_SERVERS", " , "),
            ("SVCMIRROR_SESSION_TIMEOUT_SECS", "soon"),
            ("SVCMIRROR_PURGE_ON_RESYNC", "maybe"),
        ]));
        assert_eq!(config.servers, vec!["notexists:2181"]);
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert!(!config.purge_on_resync);
    }
}
