use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::emote::EmoteKey;

/// Distinct chatters per emote since that emote last fired.
///
/// Without a window, marks never expire on their own. With one, a chatter's
/// mark is dropped once it is older than the window, and an emote with no
/// marks left is forgotten.
#[derive(Debug, Default)]
pub struct UsageTracker {
    users: HashMap<EmoteKey, HashMap<String, Instant>>,
    window: Option<Duration>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            users: HashMap::new(),
            window: Some(window),
        }
    }

    /// Marks `username` as having used `key` and returns the distinct count.
    pub fn record(&mut self, key: &EmoteKey, username: &str, now: Instant) -> usize {
        if let Some(window) = self.window {
            self.users.retain(|_, users| {
                users.retain(|_, seen| now.saturating_duration_since(*seen) < window);
                !users.is_empty()
            });
        }
        let users = self.users.entry(key.clone()).or_default();
        users.insert(username.to_owned(), now);
        users.len()
    }

    pub fn reset(&mut self, key: &EmoteKey) {
        self.users.remove(key);
    }

    #[cfg(test)]
    pub fn distinct(&self, key: &EmoteKey) -> usize {
        self.users.get(key).map_or(0, HashMap::len)
    }

    #[cfg(test)]
    pub fn tracked_emotes(&self) -> usize {
        self.users.len()
    }
}
