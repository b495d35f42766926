//! Time and randomness seams for the engine.
//!
//! The gate needs `now()` for cooldowns and `uniform01()` for its chance
//! roll; the engine also draws the send delay from the same random source.
//! Both are traits so tests can pin them down without sleeping.

use std::time::Instant;

use rand::{rngs::StdRng, Rng, SeedableRng};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub trait RandomSource: Send {
    /// Uniform value in `[0, 1)`.
    fn uniform01(&mut self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct ThreadRandom {
    rng: StdRng,
}

impl ThreadRandom {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for ThreadRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ThreadRandom {
    fn uniform01(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}
