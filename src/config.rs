//! Configuration management with validation and defaults
//!
//! Values load from an optional TOML file, then `ROUNDCORE_*` environment
//! variables override individual fields, then the result is validated.

use crate::errors::ConfigError;
use crate::games::types::{Amount, Multiplier};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub wallet: WalletConfig,
    pub aviator: AviatorConfig,
    pub stepped: SteppedConfig,
    pub color: ColorConfig,
    pub scheduler: SchedulerConfig,
    pub events: EventsConfig,
}

/// Bet limits
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WalletConfig {
    pub min_bet: Amount,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self { min_bet: 10 }
    }
}

/// Continuous crash game timing and limits
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AviatorConfig {
    pub tick_interval_ms: u64,
    /// Multiplier growth per tick
    pub increment: Multiplier,
    /// Pause between a crash and the next round
    pub round_gap_ms: u64,
    /// Bets are refused once the live multiplier passes this value
    pub acceptance_ceiling: Multiplier,
    pub crash_point_min: Multiplier,
    pub crash_point_max: Multiplier,
    pub top_bets: usize,
}

impl Default for AviatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            increment: Multiplier(5),
            round_gap_ms: 5_000,
            acceptance_ceiling: Multiplier(105),
            crash_point_min: Multiplier(110),
            crash_point_max: Multiplier(610),
            top_bets: 5,
        }
    }
}

impl AviatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn round_gap(&self) -> Duration {
        Duration::from_millis(self.round_gap_ms)
    }
}

/// Fallback sequence generation for stepped games
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SteppedConfig {
    pub min_steps: usize,
    pub max_steps: usize,
    pub step_increment: Multiplier,
    pub mine_tiles: u32,
}

impl Default for SteppedConfig {
    fn default() -> Self {
        Self {
            min_steps: 2,
            max_steps: 8,
            step_increment: Multiplier(40),
            mine_tiles: 24,
        }
    }
}

/// Timed color draw
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    pub round_duration_ms: u64,
    pub round_gap_ms: u64,
    pub countdown_interval_ms: u64,
    /// Stake multipliers a color bet may use
    pub stake_multipliers: Vec<u32>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: 60_000,
            round_gap_ms: 5_000,
            countdown_interval_ms: 1_000,
            stake_multipliers: vec![1, 5, 10, 20, 50, 100],
        }
    }
}

impl ColorConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_millis(self.round_duration_ms)
    }

    pub fn round_gap(&self) -> Duration {
        Duration::from_millis(self.round_gap_ms)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }
}

/// Admin round sweep
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub activation_interval_ms: u64,
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            activation_interval_ms: 1_000,
            history_limit: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn activation_interval(&self) -> Duration {
        Duration::from_millis(self.activation_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;

        Ok(config)
    }

    /// Parse a TOML document; missing sections fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<EngineConfig, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn load_from_file(path: &str) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<Amount>("ROUNDCORE_MIN_BET")? {
            config.wallet.min_bet = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDCORE_AVIATOR_TICK_MS")? {
            config.aviator.tick_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDCORE_AVIATOR_GAP_MS")? {
            config.aviator.round_gap_ms = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDCORE_COLOR_ROUND_MS")? {
            config.color.round_duration_ms = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDCORE_ACTIVATION_INTERVAL_MS")? {
            config.scheduler.activation_interval_ms = v;
        }
        if let Some(v) = env_parse::<usize>("ROUNDCORE_EVENT_CAPACITY")? {
            config.events.channel_capacity = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        let positive = [
            ("aviator.tick_interval_ms", config.aviator.tick_interval_ms),
            ("aviator.increment", config.aviator.increment.0 as u64),
            ("color.round_duration_ms", config.color.round_duration_ms),
            ("color.countdown_interval_ms", config.color.countdown_interval_ms),
            ("scheduler.activation_interval_ms", config.scheduler.activation_interval_ms),
            ("events.channel_capacity", config.events.channel_capacity as u64),
            ("stepped.mine_tiles", config.stepped.mine_tiles as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, value, "must be positive"));
            }
        }

        let aviator = &config.aviator;
        if aviator.crash_point_min <= Multiplier::ONE {
            return Err(invalid(
                "aviator.crash_point_min",
                aviator.crash_point_min,
                "crash point must exceed 1.00",
            ));
        }
        if aviator.crash_point_min > aviator.crash_point_max {
            return Err(invalid(
                "aviator.crash_point_max",
                aviator.crash_point_max,
                "must not be below crash_point_min",
            ));
        }
        if aviator.acceptance_ceiling < Multiplier::ONE {
            return Err(invalid(
                "aviator.acceptance_ceiling",
                aviator.acceptance_ceiling,
                "ceiling must be at least 1.00",
            ));
        }

        let stakes = &config.color.stake_multipliers;
        if stakes.is_empty() || stakes.contains(&0) {
            return Err(invalid(
                "color.stake_multipliers",
                format!("{:?}", stakes),
                "must be non-empty and every multiplier at least 1",
            ));
        }

        let stepped = &config.stepped;
        if stepped.min_steps == 0 || stepped.min_steps > stepped.max_steps {
            return Err(invalid(
                "stepped.min_steps",
                stepped.min_steps,
                "must be positive and not above max_steps",
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw,
            reason: "Invalid number".to_string(),
        }),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
