//! Outcome generation
//!
//! Deterministic time-to-multiplier curve for the crash game plus the random
//! fallback generators used when no admin round covers the current time.

use crate::config::{AviatorConfig, SteppedConfig};
use crate::games::types::{GameKind, Multiplier, RoundOutcome};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MultiplierEngine {
    aviator: AviatorConfig,
    stepped: SteppedConfig,
}

impl MultiplierEngine {
    pub fn new(aviator: AviatorConfig, stepped: SteppedConfig) -> Self {
        Self { aviator, stepped }
    }

    /// Live multiplier after `tick` ticks: `1.00 + tick * increment`
    pub fn multiplier_at_tick(&self, tick: u64) -> Multiplier {
        let grown = (tick as u128) * (self.aviator.increment.0 as u128) + 100;
        Multiplier(grown.min(u32::MAX as u128) as u32)
    }

    /// Live multiplier at `elapsed` since the round started
    pub fn multiplier_at(&self, elapsed: Duration) -> Multiplier {
        let tick = elapsed.as_millis() as u64 / self.aviator.tick_interval_ms.max(1);
        self.multiplier_at_tick(tick)
    }

    /// First tick whose multiplier reaches `crash_point`
    pub fn crash_tick(&self, crash_point: Multiplier) -> u64 {
        let above_one = crash_point.0.saturating_sub(100) as u64;
        let increment = self.aviator.increment.0.max(1) as u64;
        above_one.div_ceil(increment)
    }

    /// How long a round with this crash point stays in flight
    pub fn flight_duration(&self, crash_point: Multiplier) -> Duration {
        Duration::from_millis(self.crash_tick(crash_point) * self.aviator.tick_interval_ms)
    }

    /// Every multiplier broadcast from launch up to and including the crash tick
    pub fn tick_sequence(&self, crash_point: Multiplier) -> Vec<Multiplier> {
        (0..=self.crash_tick(crash_point))
            .map(|tick| self.multiplier_at_tick(tick))
            .collect()
    }

    /// Uniform crash point in the configured range, at hundredth precision
    pub fn random_crash_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Multiplier {
        let low = self.aviator.crash_point_min.0;
        let high = self.aviator.crash_point_max.0.max(low);
        Multiplier(rng.gen_range(low..=high))
    }

    /// Step multipliers up to the crash index, then the terminal zero
    pub fn steps_from(&self, total_steps: usize, crash_index: usize) -> Vec<Multiplier> {
        let mut steps = Vec::with_capacity(crash_index.min(total_steps) + 1);
        for i in 0..total_steps {
            if i == crash_index {
                steps.push(Multiplier::ZERO);
                break;
            }
            steps.push(Multiplier(100 + self.stepped.step_increment.0 * i as u32));
        }
        steps
    }

    pub fn random_steps<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Multiplier> {
        let total_steps = rng.gen_range(self.stepped.min_steps..=self.stepped.max_steps);
        let crash_index = rng.gen_range(0..total_steps);
        self.steps_from(total_steps, crash_index)
    }

    /// Uniform shuffle of the mine board `1..=mine_tiles`
    pub fn random_tiles<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u32> {
        let mut tiles: Vec<u32> = (1..=self.stepped.mine_tiles).collect();
        tiles.shuffle(rng);
        tiles
    }

    pub fn random_number<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
        rng.gen_range(0..=9)
    }

    /// Engine-generated outcome for `kind`
    pub fn fallback_outcome<R: Rng + ?Sized>(&self, kind: GameKind, rng: &mut R) -> RoundOutcome {
        match kind {
            GameKind::Aviator => RoundOutcome::CrashPoint(self.random_crash_point(rng)),
            GameKind::Chicken => RoundOutcome::Steps(self.random_steps(rng)),
            GameKind::Mining => RoundOutcome::Tiles(self.random_tiles(rng)),
            GameKind::Color => RoundOutcome::Number(self.random_number(rng)),
        }
    }

    /// Reject outcomes an admin could not sensibly schedule
    pub fn validate_outcome(&self, kind: GameKind, outcome: &RoundOutcome) -> Result<(), String> {
        if !kind.accepts(outcome) {
            return Err(format!("outcome {:?} does not fit game {}", outcome, kind));
        }
        match outcome {
            RoundOutcome::CrashPoint(cp) if *cp <= Multiplier::ONE => {
                Err(format!("crash point {} must exceed 1.00", cp))
            }
            RoundOutcome::Steps(steps) if steps.is_empty() => {
                Err("step sequence is empty".to_string())
            }
            RoundOutcome::Tiles(tiles) => {
                let mut sorted = tiles.clone();
                sorted.sort_unstable();
                let expected: Vec<u32> = (1..=self.stepped.mine_tiles).collect();
                if sorted != expected {
                    return Err(format!(
                        "tiles must be a permutation of 1..={}",
                        self.stepped.mine_tiles
                    ));
                }
                Ok(())
            }
            RoundOutcome::Number(n) if *n > 9 => Err(format!("winning number {} out of range", n)),
            _ => Ok(()),
        }
    }
}

impl Default for MultiplierEngine {
    fn default() -> Self {
        Self::new(AviatorConfig::default(), SteppedConfig::default())
    }
}
