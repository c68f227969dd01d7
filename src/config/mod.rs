use std::env;

/// Environment-driven tunables for the conversation monitor (`SPEC_FULL.md` §11).
///
/// These can be overridden by env vars but do not require any user-authored
/// config file.
#[derive(Debug, Clone, Copy)]
pub struct MonitorDefaults {
    pub window_count: usize,
    pub window_fill_message_count: usize,
    pub retry_connection_secs: u64,
    pub event_channel_capacity: usize,
    pub local_search_concurrency: usize,
}

impl MonitorDefaults {
    pub fn load() -> Self {
        Self {
            window_count: env_usize("MONITOR_WINDOW_COUNT", 50),
            window_fill_message_count: env_usize("MONITOR_WINDOW_FILL_MESSAGE_COUNT", 5),
            retry_connection_secs: env_u64("MONITOR_RETRY_CONNECTION_SECS", 15),
            event_channel_capacity: env_usize("MONITOR_EVENT_CHANNEL_CAPACITY", 256),
            local_search_concurrency: env_usize("MONITOR_LOCAL_SEARCH_CONCURRENCY", 8),
        }
    }
}

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self {
            window_count: 50,
            window_fill_message_count: 5,
            retry_connection_secs: 15,
            event_channel_capacity: 256,
            local_search_concurrency: 8,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let d = MonitorDefaults::default();
        assert_eq!(d.window_count, 50);
        assert_eq!(d.window_fill_message_count, 5);
        assert_eq!(d.retry_connection_secs, 15);
    }
}
