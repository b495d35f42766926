use std::{fs, path::Path, time::Duration};

use color_eyre::eyre::{eyre, WrapErr};
use serde::Deserialize;

use crate::{
    gate::{GateConfig, MIN_DISTINCT_USERS},
    usage::UsageTracker,
};

pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_RESPONSE_CHANCE: f64 = 0.1;
const DEFAULT_COOLDOWN_SECONDS: u64 = 30;

fn default_response_chance() -> f64 {
    DEFAULT_RESPONSE_CHANCE
}

fn default_cooldown_seconds() -> u64 {
    DEFAULT_COOLDOWN_SECONDS
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub username: String,
    pub oauth: String,
    pub client_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_response_chance")]
    pub response_chance: f64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub debug: bool,
    /// Forget a chatter's emote use after this many seconds. Unset keeps
    /// every use until the emote fires.
    #[serde(default)]
    pub usage_window_seconds: Option<u64>,
}

impl Config {
    /// Environment first (after `.env`), then `config.json`.
    pub fn load() -> color_eyre::Result<Self> {
        Self::from_sources(|key| std::env::var(key).ok(), Path::new(CONFIG_FILE))
    }

    fn from_sources(
        var: impl Fn(&str) -> Option<String>,
        file: &Path,
    ) -> color_eyre::Result<Self> {
        let config = match (var("USERNAME"), var("OAUTH"), var("CLIENT_ID")) {
            (Some(username), Some(oauth), Some(client_id)) => {
                Self::from_env(&var, username, oauth, client_id)?
            }
            _ => {
                let raw = fs::read_to_string(file).wrap_err_with(|| {
                    format!(
                        "No configuration found! Either set environment variables \
                         (USERNAME, OAUTH, CLIENT_ID, CHANNEL) or create {}",
                        file.display()
                    )
                })?;
                serde_json::from_str::<Config>(&raw)
                    .wrap_err_with(|| format!("invalid {}", file.display()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn from_env(
        var: &impl Fn(&str) -> Option<String>,
        username: String,
        oauth: String,
        client_id: String,
    ) -> color_eyre::Result<Self> {
        let response_chance = match var("RESPONSE_CHANCE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .wrap_err_with(|| format!("RESPONSE_CHANCE is not a number: {:?}", raw))?,
            None => DEFAULT_RESPONSE_CHANCE,
        };
        let cooldown_seconds = match var("COOLDOWN_SECONDS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .wrap_err_with(|| format!("COOLDOWN_SECONDS is not a whole number: {:?}", raw))?,
            None => DEFAULT_COOLDOWN_SECONDS,
        };
        let usage_window_seconds = var("USAGE_WINDOW_SECONDS")
            .map(|raw| {
                raw.trim().parse::<u64>().wrap_err_with(|| {
                    format!("USAGE_WINDOW_SECONDS is not a whole number: {:?}", raw)
                })
            })
            .transpose()?;
        let debug = var("DEBUG").map_or(false, |v| v == "true" || v == "1");

        Ok(Config {
            channel: var("CHANNEL"),
            username,
            oauth,
            client_id,
            response_chance,
            cooldown_seconds,
            debug,
            usage_window_seconds,
        })
    }

    fn validate(&self) -> color_eyre::Result<()> {
        if self.username.is_empty() || self.oauth.is_empty() || self.client_id.is_empty() {
            return Err(eyre!(
                "Missing required fields (username, oauth, clientId). Set USERNAME, OAUTH and \
                 CLIENT_ID environment variables or create {}",
                CONFIG_FILE
            ));
        }
        if !(0.0..=1.0).contains(&self.response_chance) {
            return Err(eyre!(
                "responseChance must be between 0 and 1, got {}",
                self.response_chance
            ));
        }
        Ok(())
    }

    /// Channel to monitor; the bot's own channel when unset.
    pub fn channel(&self) -> &str {
        self.channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.username)
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            response_chance: self.response_chance,
            cooldown: Duration::from_secs(self.cooldown_seconds),
            min_distinct_users: MIN_DISTINCT_USERS,
        }
    }

    pub fn usage_tracker(&self) -> UsageTracker {
        match self.usage_window_seconds {
            Some(secs) => UsageTracker::with_window(Duration::from_secs(secs)),
            None => UsageTracker::new(),
        }
    }
}
