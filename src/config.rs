//! Dinner configuration, loadable from TOML.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::{ChopstickId, PhilosopherId};

/// Top-level configuration.
///
/// Without a `[table]` section the dinner is a ring of `philosophers` seats.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DinnerConfig {
    /// Ring size when no explicit table is given
    pub philosophers: usize,

    /// Meals each philosopher eats before leaving
    pub portions: usize,

    /// Request slots per mailbox
    pub mailbox_capacity: usize,

    /// Upper bound of the random pause after each meal (microseconds, 0 = none)
    pub think_jitter_us: u64,

    /// Explicit need graph
    pub table: Option<TableConfig>,
}

/// An arbitrary need graph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableConfig {
    pub chopsticks: usize,
    pub seats: Vec<SeatConfig>,

    /// Initial holder of each chopstick. Defaults to the lowest-numbered seat needing it.
    #[serde(default)]
    pub holders: Option<Vec<PhilosopherId>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeatConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub needs: Vec<ChopstickId>,
}

impl Default for DinnerConfig {
    fn default() -> Self {
        Self {
            philosophers: 5,
            portions: 5,
            mailbox_capacity: 5,
            think_jitter_us: 0,
            table: None,
        }
    }
}

impl DinnerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: DinnerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    // 形の妥当性だけ見る。グラフの検証は Table の構築時
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_none() && self.philosophers < 2 {
            return Err(ConfigError::Invalid(format!(
                "philosophers must be at least 2, got {}",
                self.philosophers
            )));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
