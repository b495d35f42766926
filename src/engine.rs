use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    catalog::EmoteCatalog,
    clock::{Clock, RandomSource, SystemClock, ThreadRandom},
    emote::EmoteKey,
    gate::{ResponseGate, Verdict},
    matcher::match_emotes,
    usage::UsageTracker,
};

const MIN_SEND_DELAY_MS: u64 = 1000;
const SEND_DELAY_SPREAD_MS: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub username: String,
    pub text: String,
    pub is_self: bool,
}

/// A fired response waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseIntent {
    pub channel: String,
    pub text: String,
    pub delay: Duration,
    pub trigger_user: String,
    pub trigger_message: String,
}

pub fn normalize_channel(channel: &str) -> String {
    channel.trim_start_matches('#').to_lowercase()
}

pub struct Engine {
    channel: String,
    bot_username: String,
    catalog: Arc<EmoteCatalog>,
    usage: UsageTracker,
    gate: ResponseGate,
    clock: Box<dyn Clock>,
    random: Box<dyn RandomSource>,
}

impl Engine {
    pub fn new(
        channel: &str,
        bot_username: &str,
        catalog: Arc<EmoteCatalog>,
        usage: UsageTracker,
        gate: ResponseGate,
    ) -> Self {
        Self {
            channel: normalize_channel(channel),
            bot_username: bot_username.to_owned(),
            catalog,
            usage,
            gate,
            clock: Box::new(SystemClock),
            random: Box::new(ThreadRandom::new()),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[cfg(test)]
    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn catalog(&self) -> &Arc<EmoteCatalog> {
        &self.catalog
    }

    #[cfg(test)]
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    #[cfg(test)]
    pub fn gate(&self) -> &ResponseGate {
        &self.gate
    }

    /// Runs one chat message through matching, usage and the gate.
    ///
    /// At most one response comes out of a message; the first emote that
    /// fires wins and the remaining matches are not recorded.
    pub fn handle_message(&mut self, message: &ChatMessage) -> Option<ResponseIntent> {
        if message.is_self || message.username.eq_ignore_ascii_case(&self.bot_username) {
            return None;
        }
        if normalize_channel(&message.channel) != self.channel {
            return None;
        }

        let now = self.clock.now();
        for emote in match_emotes(&self.catalog, &message.text) {
            let key = EmoteKey::of(&emote);
            let distinct = self.usage.record(&key, &message.username, now);

            let random = &mut self.random;
            match self.gate.evaluate(distinct, now, || random.uniform01()) {
                Verdict::Fire => {
                    self.usage.reset(&key);
                    let delay = self.send_delay();
                    info!(
                        channel = %self.channel,
                        emote = %emote.name,
                        url = %emote.cdn_url(),
                        user = %message.username,
                        distinct,
                        delay_ms = delay.as_millis() as u64,
                        "emote trending, echoing"
                    );
                    return Some(ResponseIntent {
                        channel: self.channel.clone(),
                        text: emote.name,
                        delay,
                        trigger_user: message.username.clone(),
                        trigger_message: message.text.clone(),
                    });
                }
                Verdict::CoolingDown { remaining } => {
                    debug!(emote = %key, distinct, remaining_secs = remaining.as_secs_f64(), "cooldown active");
                }
                Verdict::ChanceMiss => {
                    debug!(emote = %key, distinct, "chance roll missed");
                }
                Verdict::BelowThreshold => {}
            }
        }

        None
    }

    /// Called when sending a fired response failed.
    pub fn send_failed(&mut self) {
        warn!(channel = %self.channel, "response not delivered, clearing cooldown");
        self.gate.rollback();
    }

    fn send_delay(&mut self) -> Duration {
        let spread = (self.random.uniform01() * SEND_DELAY_SPREAD_MS).floor() as u64;
        Duration::from_millis(MIN_SEND_DELAY_MS + spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::testing::{FixedRandom, ManualClock},
        emote::Emote,
        gate::GateConfig,
    };

    fn engine(names: &[&str], chance: f64, clock: ManualClock) -> Engine {
        let catalog = Arc::new(EmoteCatalog::new());
        catalog
            .refresh(names.iter().map(|n| Emote::new(*n, *n, false)).collect())
            .unwrap();
        let gate = ResponseGate::new(GateConfig {
            response_chance: chance,
            cooldown: Duration::from_secs(30),
            ..GateConfig::default()
        });
        Engine::new("#streamer", "echobot", catalog, UsageTracker::new(), gate)
            .with_clock(clock)
            .with_random(FixedRandom(0.0))
    }

    fn msg(user: &str, text: &str) -> ChatMessage {
        ChatMessage {
            channel: "#streamer".to_owned(),
            username: user.to_owned(),
            text: text.to_owned(),
            is_self: false,
        }
    }

    fn key(name: &str) -> EmoteKey {
        EmoteKey::of(&Emote::new(name, name, false))
    }

    #[test]
    fn three_distinct_users_fire_once() {
        let mut engine = engine(&["KEKW"], 1.0, ManualClock::new());

        assert_eq!(engine.handle_message(&msg("a", "KEKW")), None);
        assert_eq!(engine.handle_message(&msg("b", "lol KEKW")), None);
        let intent = engine.handle_message(&msg("c", "KEKW!!")).unwrap();

        assert_eq!(intent.text, "KEKW");
        assert_eq!(intent.channel, "streamer");
        assert_eq!(intent.trigger_user, "c");
        assert_eq!(intent.delay, Duration::from_millis(1000));
        assert_eq!(engine.usage().distinct(&key("KEKW")), 0);
    }

    #[test]
    fn two_users_do_not_fire() {
        let mut engine = engine(&["KEKW"], 1.0, ManualClock::new());

        assert_eq!(engine.handle_message(&msg("a", "KEKW")), None);
        assert_eq!(engine.handle_message(&msg("b", "KEKW")), None);
        assert_eq!(engine.handle_message(&msg("a", "KEKW KEKW")), None);
        assert_eq!(engine.usage().distinct(&key("KEKW")), 2);
    }

    #[test]
    fn cooldown_holds_after_fire() {
        let clock = ManualClock::new();
        let mut engine = engine(&["KEKW"], 1.0, clock.clone());
        for user in ["a", "b", "c"] {
            engine.handle_message(&msg(user, "KEKW"));
        }

        clock.advance(Duration::from_secs(1));
        for user in ["d", "e", "f"] {
            assert_eq!(engine.handle_message(&msg(user, "KEKW")), None);
        }
        assert_eq!(engine.usage().distinct(&key("KEKW")), 3);

        clock.advance(Duration::from_secs(28));
        assert_eq!(engine.handle_message(&msg("g", "KEKW")), None);

        clock.advance(Duration::from_secs(1));
        let intent = engine.handle_message(&msg("h", "KEKW")).unwrap();
        assert_eq!(intent.text, "KEKW");
    }

    #[test]
    fn cooldown_is_shared_across_emotes() {
        let clock = ManualClock::new();
        let mut engine = engine(&["KEKW", "Aware"], 1.0, clock.clone());
        for user in ["a", "b", "c"] {
            engine.handle_message(&msg(user, "KEKW"));
        }

        clock.advance(Duration::from_secs(5));
        for user in ["a", "b", "c"] {
            assert_eq!(engine.handle_message(&msg(user, "Aware")), None);
        }
        assert_eq!(engine.usage().distinct(&key("Aware")), 3);
    }

    #[test]
    fn chance_miss_keeps_usage() {
        let mut engine = engine(&["KEKW"], 0.0, ManualClock::new());
        for user in ["a", "b", "c", "d"] {
            assert_eq!(engine.handle_message(&msg(user, "KEKW")), None);
        }
        assert_eq!(engine.usage().distinct(&key("KEKW")), 4);
        assert_eq!(engine.gate().last_response(), None);
    }

    #[test]
    fn fire_only_resets_the_firing_emote() {
        let mut engine = engine(&["KEKW", "Aware"], 1.0, ManualClock::new());
        engine.handle_message(&msg("a", "Aware KEKW"));
        engine.handle_message(&msg("b", "Aware KEKW"));

        let intent = engine.handle_message(&msg("c", "Aware KEKW")).unwrap();
        assert_eq!(intent.text, "Aware");
        assert_eq!(engine.usage().distinct(&key("Aware")), 0);
        // Processing stopped at the fire, so "c" never reached KEKW.
        assert_eq!(engine.usage().distinct(&key("KEKW")), 2);
    }

    #[test]
    fn send_failure_rolls_back_cooldown_but_not_usage() {
        let clock = ManualClock::new();
        let mut engine = engine(&["KEKW"], 1.0, clock.clone());
        for user in ["a", "b", "c"] {
            engine.handle_message(&msg(user, "KEKW"));
        }
        assert!(engine.gate().last_response().is_some());

        engine.send_failed();
        assert_eq!(engine.gate().last_response(), None);
        assert_eq!(engine.usage().distinct(&key("KEKW")), 0);

        clock.advance(Duration::from_secs(1));
        engine.handle_message(&msg("d", "KEKW"));
        engine.handle_message(&msg("e", "KEKW"));
        assert!(engine.handle_message(&msg("f", "KEKW")).is_some());
    }

    #[test]
    fn own_messages_are_ignored() {
        let mut engine = engine(&["KEKW"], 1.0, ManualClock::new());

        let mut own = msg("someone", "KEKW");
        own.is_self = true;
        engine.handle_message(&own);
        engine.handle_message(&msg("EchoBot", "KEKW"));

        assert_eq!(engine.usage().distinct(&key("KEKW")), 0);
    }

    #[test]
    fn other_channels_are_ignored() {
        let mut engine = engine(&["KEKW"], 1.0, ManualClock::new());
        let mut elsewhere = msg("a", "KEKW");
        elsewhere.channel = "#other".to_owned();

        assert_eq!(engine.handle_message(&elsewhere), None);
        assert_eq!(engine.usage().distinct(&key("KEKW")), 0);
    }

    #[test]
    fn catalog_refresh_is_seen_by_engine() {
        let mut engine = engine(&["KEKW"], 1.0, ManualClock::new());
        engine
            .catalog()
            .refresh(vec![Emote::new("Aware", "1", false)])
            .unwrap();

        engine.handle_message(&msg("a", "KEKW Aware"));
        assert_eq!(engine.usage().distinct(&key("KEKW")), 0);
        assert_eq!(engine.usage().distinct(&key("Aware")), 1);
    }

    #[test]
    fn send_delay_spans_one_to_two_seconds() {
        let catalog = Arc::new(EmoteCatalog::new());
        catalog.refresh(vec![Emote::new("KEKW", "1", false)]).unwrap();
        let gate = ResponseGate::new(GateConfig {
            response_chance: 1.0,
            ..GateConfig::default()
        });
        let mut engine = Engine::new("streamer", "echobot", catalog, UsageTracker::new(), gate)
            .with_clock(ManualClock::new())
            .with_random(FixedRandom(0.9995));

        for user in ["a", "b"] {
            engine.handle_message(&msg(user, "KEKW"));
        }
        let intent = engine.handle_message(&msg("c", "KEKW")).unwrap();
        assert_eq!(intent.delay, Duration::from_millis(1999));
    }
}
