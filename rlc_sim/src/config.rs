//! Loopback simulation configuration
//!
//! Loaded from YAML (`.yml`/`.yaml`) or TOML (`.toml`); every section is optional.

use anyhow::{anyhow, Context};
use common::types::{Lcid, Rat};
use layers::rlc::RlcConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimConfig {
    /// Traffic and channel parameters
    #[serde(default)]
    pub sim: RunConfig,
    /// Bearers set up on both peers, DRB1 in AM NR if empty
    #[serde(default)]
    pub bearers: Vec<BearerConfig>,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Traffic and channel parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Simulated time in ms
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Bytes per SDU
    #[serde(default = "default_sdu_size")]
    pub sdu_size: usize,
    /// One SDU per bearer every this many ms
    #[serde(default = "default_sdu_interval_ms")]
    pub sdu_interval_ms: u64,
    /// MAC grant per bearer and direction each ms
    #[serde(default = "default_grant_size")]
    pub grant_size: usize,
    /// Probability of losing a PDU on the air, 0.0 to 1.0
    #[serde(default)]
    pub loss_rate: f64,
    /// Seed of the loss process, random if absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_duration_ms() -> u64 {
    1000
}

fn default_sdu_size() -> usize {
    500
}

fn default_sdu_interval_ms() -> u64 {
    1
}

fn default_grant_size() -> usize {
    1500
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            sdu_size: default_sdu_size(),
            sdu_interval_ms: default_sdu_interval_ms(),
            grant_size: default_grant_size(),
            loss_rate: 0.0,
            seed: None,
        }
    }
}

/// One bearer of both peers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    /// Logical channel ID
    pub lcid: u32,
    /// RLC parameters
    #[serde(flatten)]
    pub rlc: RlcConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level used when neither RUST_LOG nor the command line sets one
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SimConfig {
    /// Load configuration, the format chosen by file extension
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            _ => return Err(anyhow!("unsupported config format: {}", path.display())),
        };
        Ok(config)
    }

    /// Bearers to set up, the default DRB if none are configured
    pub fn bearers(&self) -> Vec<BearerConfig> {
        if self.bearers.is_empty() {
            return vec![BearerConfig {
                lcid: 3,
                rlc: RlcConfig::default_drb_am(Rat::Nr),
            }];
        }
        self.bearers.clone()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.sim.loss_rate) {
            return Err(anyhow!("loss_rate {} outside [0, 1]", self.sim.loss_rate));
        }
        if self.sim.sdu_size == 0 || self.sim.grant_size == 0 || self.sim.sdu_interval_ms == 0 {
            return Err(anyhow!("sdu_size, grant_size and sdu_interval_ms must be positive"));
        }
        for bearer in self.bearers() {
            let lcid = Lcid::new(bearer.lcid)
                .ok_or_else(|| anyhow!("invalid LCID {}", bearer.lcid))?;
            if lcid == Lcid::SRB0 {
                return Err(anyhow!("SRB0 is always present and cannot be configured"));
            }
            bearer
                .rlc
                .validate()
                .with_context(|| format!("bearer {}", lcid.rb_name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::RlcMode;

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
sim:
  duration_ms: 200
  loss_rate: 0.1
  seed: 7
bearers:
  - lcid: 4
    rat: lte
    mode: um
    um_lte:
      tx_sn_field_length: 5
      rx_sn_field_length: 5
"#;
        let config: SimConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sim.duration_ms, 200);
        assert_eq!(config.sim.grant_size, 1500);
        assert_eq!(config.bearers[0].rlc.mode, RlcMode::Um);
        assert_eq!(config.bearers[0].rlc.um_lte.tx_sn_field_length, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_config() {
        let config: SimConfig = toml::from_str(
            r#"
[sim]
grant_size = 300

[log]
level = "debug"

[[bearers]]
lcid = 3
rat = "nr"
mode = "am"
"#,
        )
        .unwrap();
        assert_eq!(config.sim.grant_size, 300);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.bearers[0].rlc.rat, Rat::Nr);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_bearer_and_validation() {
        let mut config = SimConfig::default();
        assert_eq!(config.bearers()[0].lcid, 3);
        config.validate().unwrap();

        config.sim.loss_rate = 1.5;
        assert!(config.validate().is_err());

        config.sim.loss_rate = 0.0;
        config.bearers = vec![BearerConfig {
            lcid: 0,
            rlc: RlcConfig::tm(Rat::Nr),
        }];
        assert!(config.validate().is_err());
    }
}
