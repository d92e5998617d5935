// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Aggregator Configuration
//
// Declarative options of an aggregating handler. Strategies, processors and
// channels are code and are wired through `AggregatingMessageHandlerBuilder`;
// only the policy switches and the reaper schedule live here.
//
// ```yaml
// name: order-aggregator
// send_partial_result_on_expiry: true
// expire_groups_upon_timeout: true
// expire_groups_upon_completion: true
// reaper:
//   enabled: true
//   interval: 10s
//   group_timeout: 1m
// ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::error::AggregatorError;

/// Policy switches of one aggregating handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Handler identity, reported as `source` on every event
    pub name: String,

    /// On timeout, reduce and send the incomplete group instead of discarding it
    pub send_partial_result_on_expiry: bool,

    /// Remove timed-out groups from the store (otherwise keep them, emptied and marked expired)
    pub expire_groups_upon_timeout: bool,

    /// Remove released groups from the store (otherwise keep them, emptied and marked complete)
    pub expire_groups_upon_completion: bool,

    /// Background expiry sweep
    pub reaper: ReaperConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            name: "aggregator".to_string(),
            send_partial_result_on_expiry: false,
            expire_groups_upon_timeout: true,
            expire_groups_upon_completion: true,
            reaper: ReaperConfig::default(),
        }
    }
}

/// Schedule of the background expiry sweep (`GroupExpirySweeper::start`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,

    /// How often the sweep runs
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Groups idle for longer than this are expired
    #[serde(with = "humantime_serde")]
    pub group_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
            group_timeout: Duration::from_secs(60),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONFLUX_*` environment overrides on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let switches: [(&str, &mut bool); 3] = [
            (
                "CONFLUX_SEND_PARTIAL_RESULT_ON_EXPIRY",
                &mut self.send_partial_result_on_expiry,
            ),
            (
                "CONFLUX_EXPIRE_GROUPS_UPON_TIMEOUT",
                &mut self.expire_groups_upon_timeout,
            ),
            (
                "CONFLUX_EXPIRE_GROUPS_UPON_COMPLETION",
                &mut self.expire_groups_upon_completion,
            ),
        ];

        for (name, slot) in switches {
            let Some(val) = lookup(name) else {
                continue;
            };
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: {}=true", name);
                    *slot = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: {}=false", name);
                    *slot = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                        name,
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.name.trim().is_empty() {
            return Err(AggregatorError::Config("name must not be empty".to_string()));
        }
        if self.reaper.enabled && self.reaper.interval.is_zero() {
            return Err(AggregatorError::Config(
                "reaper.interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
