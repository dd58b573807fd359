//! RLC Bearer Configuration
//!
//! Serde-friendly configuration for TM, UM and AM bearers in LTE and NR flavours,
//! mirroring the parameters of TS 36.331 / TS 38.331 RLC-Config.

use crate::LayerError;
use common::types::{Rat, RlcMode};
use serde::{Deserialize, Serialize};

/// Default SDU queue length of a bearer
pub const DEFAULT_TX_QUEUE_LENGTH: u32 = 128;

/// Largest SDU queue length an AM LTE bearer accepts
pub const MAX_TX_QUEUE_LENGTH_AM_LTE: u32 = 128;

/// Largest SDU queue length of every other bearer type
pub const MAX_TX_QUEUE_LENGTH: u32 = 256;

/// Complete configuration of one RLC bearer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlcConfig {
    /// Radio access technology
    pub rat: Rat,
    /// Operating mode
    pub mode: RlcMode,
    /// Capacity of the SDU queue
    #[serde(default = "default_tx_queue_length")]
    pub tx_queue_length: u32,
    /// Parameters for AM LTE bearers
    #[serde(default)]
    pub am_lte: AmLteConfig,
    /// Parameters for AM NR bearers
    #[serde(default)]
    pub am_nr: AmNrConfig,
    /// Parameters for UM LTE bearers
    #[serde(default)]
    pub um_lte: UmLteConfig,
    /// Parameters for UM NR bearers
    #[serde(default)]
    pub um_nr: UmNrConfig,
}

fn default_tx_queue_length() -> u32 {
    DEFAULT_TX_QUEUE_LENGTH
}

/// AM LTE parameters (TS 36.322 section 7)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmLteConfig {
    /// t-PollRetransmit in ms
    #[serde(default = "default_t_poll_retx")]
    pub t_poll_retx_ms: u32,
    /// Poll after this many PDUs, `None` for infinity
    #[serde(default = "default_poll_pdu")]
    pub poll_pdu: Option<u32>,
    /// Poll after this many bytes, `None` for infinity
    #[serde(default = "default_poll_byte")]
    pub poll_byte: Option<u32>,
    /// maxRetxThreshold
    #[serde(default = "default_max_retx_threshold")]
    pub max_retx_threshold: u32,
    /// t-Reordering in ms
    #[serde(default = "default_t_reordering")]
    pub t_reordering_ms: u32,
    /// t-StatusProhibit in ms, 0 disables the timer
    #[serde(default = "default_t_status_prohibit")]
    pub t_status_prohibit_ms: u32,
}

impl Default for AmLteConfig {
    fn default() -> Self {
        Self {
            t_poll_retx_ms: default_t_poll_retx(),
            poll_pdu: default_poll_pdu(),
            poll_byte: default_poll_byte(),
            max_retx_threshold: default_max_retx_threshold(),
            t_reordering_ms: default_t_reordering(),
            t_status_prohibit_ms: default_t_status_prohibit(),
        }
    }
}

/// AM NR parameters (TS 38.322 section 7)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmNrConfig {
    /// SN length used on the transmitting side (12 or 18)
    #[serde(default = "default_am_nr_sn_length")]
    pub tx_sn_field_length: u8,
    /// SN length used on the receiving side (12 or 18)
    #[serde(default = "default_am_nr_sn_length")]
    pub rx_sn_field_length: u8,
    /// t-PollRetransmit in ms
    #[serde(default = "default_t_poll_retx")]
    pub t_poll_retx_ms: u32,
    /// Poll after this many PDUs, `None` for infinity
    #[serde(default = "default_poll_pdu")]
    pub poll_pdu: Option<u32>,
    /// Poll after this many bytes, `None` for infinity
    #[serde(default = "default_poll_byte")]
    pub poll_byte: Option<u32>,
    /// maxRetxThreshold
    #[serde(default = "default_max_retx_threshold")]
    pub max_retx_threshold: u32,
    /// t-Reassembly in ms
    #[serde(default = "default_t_reordering", alias = "t_reordering_ms")]
    pub t_reassembly_ms: u32,
    /// t-StatusProhibit in ms, 0 disables the timer
    #[serde(default = "default_t_status_prohibit")]
    pub t_status_prohibit_ms: u32,
    /// Upper bound of NACK entries in one status PDU
    #[serde(default = "default_max_nacks")]
    pub max_nacks_per_status: u32,
}

impl Default for AmNrConfig {
    fn default() -> Self {
        Self {
            tx_sn_field_length: default_am_nr_sn_length(),
            rx_sn_field_length: default_am_nr_sn_length(),
            t_poll_retx_ms: default_t_poll_retx(),
            poll_pdu: default_poll_pdu(),
            poll_byte: default_poll_byte(),
            max_retx_threshold: default_max_retx_threshold(),
            t_reassembly_ms: default_t_reordering(),
            t_status_prohibit_ms: default_t_status_prohibit(),
            max_nacks_per_status: default_max_nacks(),
        }
    }
}

/// UM LTE parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmLteConfig {
    /// SN length used on the transmitting side (5 or 10)
    #[serde(default = "default_um_lte_sn_length")]
    pub tx_sn_field_length: u8,
    /// SN length used on the receiving side (5 or 10)
    #[serde(default = "default_um_lte_sn_length")]
    pub rx_sn_field_length: u8,
    /// t-Reordering in ms
    #[serde(default = "default_t_reordering")]
    pub t_reordering_ms: u32,
}

impl Default for UmLteConfig {
    fn default() -> Self {
        Self {
            tx_sn_field_length: default_um_lte_sn_length(),
            rx_sn_field_length: default_um_lte_sn_length(),
            t_reordering_ms: default_t_reordering(),
        }
    }
}

/// UM NR parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmNrConfig {
    /// SN length used on the transmitting side (6 or 12)
    #[serde(default = "default_um_nr_sn_length")]
    pub tx_sn_field_length: u8,
    /// SN length used on the receiving side (6 or 12)
    #[serde(default = "default_um_nr_sn_length")]
    pub rx_sn_field_length: u8,
    /// t-Reassembly in ms
    #[serde(default = "default_t_reordering", alias = "t_reordering_ms")]
    pub t_reassembly_ms: u32,
}

impl Default for UmNrConfig {
    fn default() -> Self {
        Self {
            tx_sn_field_length: default_um_nr_sn_length(),
            rx_sn_field_length: default_um_nr_sn_length(),
            t_reassembly_ms: default_t_reordering(),
        }
    }
}

fn default_t_poll_retx() -> u32 {
    5
}

fn default_poll_pdu() -> Option<u32> {
    Some(4)
}

fn default_poll_byte() -> Option<u32> {
    Some(25_000)
}

fn default_max_retx_threshold() -> u32 {
    4
}

fn default_t_reordering() -> u32 {
    5
}

fn default_t_status_prohibit() -> u32 {
    5
}

fn default_max_nacks() -> u32 {
    128
}

fn default_am_nr_sn_length() -> u8 {
    12
}

fn default_um_lte_sn_length() -> u8 {
    10
}

fn default_um_nr_sn_length() -> u8 {
    6
}

impl Default for RlcConfig {
    /// Transparent mode, the configuration of SRB0
    fn default() -> Self {
        Self::tm(Rat::Lte)
    }
}

impl RlcConfig {
    fn with_mode(rat: Rat, mode: RlcMode) -> Self {
        Self {
            rat,
            mode,
            tx_queue_length: DEFAULT_TX_QUEUE_LENGTH,
            am_lte: AmLteConfig::default(),
            am_nr: AmNrConfig::default(),
            um_lte: UmLteConfig::default(),
            um_nr: UmNrConfig::default(),
        }
    }

    /// Transparent mode bearer
    pub fn tm(rat: Rat) -> Self {
        Self::with_mode(rat, RlcMode::Tm)
    }

    /// Signalling radio bearer profile. SRB0 is TM, SRB1 and SRB2 are AM.
    pub fn default_srb(rat: Rat, srb_id: u32) -> Self {
        if srb_id == 0 || srb_id > 2 {
            return Self::tm(rat);
        }
        let mut cfg = Self::with_mode(rat, RlcMode::Am);
        cfg.am_lte = AmLteConfig {
            t_poll_retx_ms: 45,
            poll_pdu: None,
            poll_byte: None,
            max_retx_threshold: 4,
            t_reordering_ms: 35,
            t_status_prohibit_ms: 0,
        };
        cfg.am_nr = AmNrConfig {
            t_poll_retx_ms: 45,
            poll_pdu: None,
            poll_byte: None,
            t_reassembly_ms: 35,
            t_status_prohibit_ms: 0,
            ..AmNrConfig::default()
        };
        cfg
    }

    /// Acknowledged mode data radio bearer profile
    pub fn default_drb_am(rat: Rat) -> Self {
        Self::with_mode(rat, RlcMode::Am)
    }

    /// Unacknowledged mode data radio bearer profile with the given SN length
    pub fn default_drb_um(rat: Rat, sn_field_length: u8) -> Self {
        let mut cfg = Self::with_mode(rat, RlcMode::Um);
        match rat {
            Rat::Lte => {
                cfg.um_lte.tx_sn_field_length = sn_field_length;
                cfg.um_lte.rx_sn_field_length = sn_field_length;
            }
            Rat::Nr => {
                cfg.um_nr.tx_sn_field_length = sn_field_length;
                cfg.um_nr.rx_sn_field_length = sn_field_length;
            }
        }
        cfg
    }

    /// SN length of the active mode, 0 for TM
    pub fn sn_field_length(&self) -> u8 {
        match (self.mode, self.rat) {
            (RlcMode::Tm, _) => 0,
            (RlcMode::Um, Rat::Lte) => self.um_lte.tx_sn_field_length,
            (RlcMode::Um, Rat::Nr) => self.um_nr.tx_sn_field_length,
            (RlcMode::Am, Rat::Lte) => 10,
            (RlcMode::Am, Rat::Nr) => self.am_nr.tx_sn_field_length,
        }
    }

    /// Largest SDU queue length allowed for this bearer type
    pub fn max_tx_queue_length(&self) -> u32 {
        match (self.mode, self.rat) {
            (RlcMode::Am, Rat::Lte) => MAX_TX_QUEUE_LENGTH_AM_LTE,
            _ => MAX_TX_QUEUE_LENGTH,
        }
    }

    /// Check the parameters of the active mode for consistency
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.tx_queue_length == 0 || self.tx_queue_length > self.max_tx_queue_length() {
            return Err(LayerError::InvalidConfiguration(format!(
                "tx_queue_length {} outside 1..={}",
                self.tx_queue_length,
                self.max_tx_queue_length()
            )));
        }

        match (self.mode, self.rat) {
            (RlcMode::Tm, _) => Ok(()),
            (RlcMode::Um, Rat::Lte) => check_sn_lengths(
                self.um_lte.tx_sn_field_length,
                self.um_lte.rx_sn_field_length,
                &[5, 10],
            ),
            (RlcMode::Um, Rat::Nr) => check_sn_lengths(
                self.um_nr.tx_sn_field_length,
                self.um_nr.rx_sn_field_length,
                &[6, 12],
            ),
            (RlcMode::Am, Rat::Lte) => check_am_thresholds(
                self.am_lte.max_retx_threshold,
                self.am_lte.t_poll_retx_ms,
            ),
            (RlcMode::Am, Rat::Nr) => {
                check_sn_lengths(
                    self.am_nr.tx_sn_field_length,
                    self.am_nr.rx_sn_field_length,
                    &[12, 18],
                )?;
                if self.am_nr.max_nacks_per_status == 0 {
                    return Err(LayerError::InvalidConfiguration(
                        "max_nacks_per_status must be positive".into(),
                    ));
                }
                check_am_thresholds(self.am_nr.max_retx_threshold, self.am_nr.t_poll_retx_ms)
            }
        }
    }
}

fn check_sn_lengths(tx: u8, rx: u8, allowed: &[u8]) -> Result<(), LayerError> {
    if tx != rx {
        return Err(LayerError::InvalidConfiguration(format!(
            "mismatched SN field lengths: tx {} bits, rx {} bits",
            tx, rx
        )));
    }
    if !allowed.contains(&tx) {
        return Err(LayerError::InvalidConfiguration(format!(
            "unsupported SN field length {} (allowed {:?})",
            tx, allowed
        )));
    }
    Ok(())
}

fn check_am_thresholds(max_retx_threshold: u32, t_poll_retx_ms: u32) -> Result<(), LayerError> {
    if max_retx_threshold == 0 {
        return Err(LayerError::InvalidConfiguration(
            "max_retx_threshold must be positive".into(),
        ));
    }
    if t_poll_retx_ms == 0 {
        return Err(LayerError::InvalidConfiguration(
            "t_poll_retx_ms must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles_are_valid() {
        for rat in [Rat::Lte, Rat::Nr] {
            assert!(RlcConfig::tm(rat).validate().is_ok());
            assert!(RlcConfig::default_srb(rat, 1).validate().is_ok());
            assert!(RlcConfig::default_drb_am(rat).validate().is_ok());
        }
        assert!(RlcConfig::default_drb_um(Rat::Lte, 5).validate().is_ok());
        assert!(RlcConfig::default_drb_um(Rat::Nr, 12).validate().is_ok());
    }

    #[test]
    fn test_srb0_is_tm() {
        assert_eq!(RlcConfig::default_srb(Rat::Lte, 0).mode, RlcMode::Tm);
        assert_eq!(RlcConfig::default_srb(Rat::Nr, 2).mode, RlcMode::Am);
    }

    #[test]
    fn test_mismatched_sn_length_rejected() {
        let mut cfg = RlcConfig::default_drb_um(Rat::Lte, 10);
        cfg.um_lte.rx_sn_field_length = 5;
        assert!(matches!(
            cfg.validate(),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unsupported_sn_length_rejected() {
        assert!(RlcConfig::default_drb_um(Rat::Nr, 10).validate().is_err());
        let mut cfg = RlcConfig::default_drb_am(Rat::Nr);
        cfg.am_nr.tx_sn_field_length = 18;
        cfg.am_nr.rx_sn_field_length = 18;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_queue_length_bounds() {
        let mut cfg = RlcConfig::default_drb_am(Rat::Lte);
        cfg.tx_queue_length = 129;
        assert!(cfg.validate().is_err());
        cfg.rat = Rat::Nr;
        assert!(cfg.validate().is_ok());
        cfg.tx_queue_length = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let cfg: RlcConfig =
            serde_json::from_str(r#"{"rat":"nr","mode":"am","am_nr":{"t_reassembly_ms":20}}"#)
                .unwrap();
        assert_eq!(cfg.am_nr.t_reassembly_ms, 20);
        assert_eq!(cfg.am_nr.tx_sn_field_length, 12);
        assert_eq!(cfg.tx_queue_length, DEFAULT_TX_QUEUE_LENGTH);
        assert_eq!(cfg.sn_field_length(), 12);
    }
}
