use std::time::{Duration, Instant};

pub const MIN_DISTINCT_USERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub response_chance: f64,
    pub cooldown: Duration,
    pub min_distinct_users: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            response_chance: 0.1,
            cooldown: Duration::from_secs(30),
            min_distinct_users: MIN_DISTINCT_USERS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    BelowThreshold,
    CoolingDown { remaining: Duration },
    ChanceMiss,
    Fire,
}

/// Decides whether a trending emote gets echoed.
///
/// One cooldown is shared by every emote. The timestamp is taken when the
/// gate fires, not when the message is eventually sent, so triggers that
/// arrive during the send delay see the cooldown already running.
///
/// If the send later fails, [`ResponseGate::rollback`] forgets the last
/// response entirely. The usage reset that accompanied the fire is not
/// restored; that asymmetry is part of the contract.
#[derive(Debug)]
pub struct ResponseGate {
    config: GateConfig,
    last_response: Option<Instant>,
}

impl ResponseGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_response: None,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn last_response(&self) -> Option<Instant> {
        self.last_response
    }

    /// `roll` is only consulted once threshold and cooldown pass.
    pub fn evaluate(
        &mut self,
        distinct_users: usize,
        now: Instant,
        roll: impl FnOnce() -> f64,
    ) -> Verdict {
        if distinct_users < self.config.min_distinct_users {
            return Verdict::BelowThreshold;
        }

        if let Some(last) = self.last_response {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.cooldown {
                return Verdict::CoolingDown {
                    remaining: self.config.cooldown - elapsed,
                };
            }
        }

        if roll() >= self.config.response_chance {
            return Verdict::ChanceMiss;
        }

        self.last_response = Some(now);
        Verdict::Fire
    }

    pub fn rollback(&mut self) {
        self.last_response = None;
    }
}
