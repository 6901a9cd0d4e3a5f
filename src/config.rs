use std::path::Path;

use anyhow::Error;
use serde::{Deserialize, Serialize};

use crate::{revert::RevertPolicy, uart::UART_BAUD};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: String,
    pub baud_rate: u32,
    pub revert_policy: RevertPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            baud_rate: UART_BAUD,
            revert_policy: RevertPolicy::AllFire,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)?;
        let config: Config = ron::from_str(&config)?;
        Ok(config)
    }
}
