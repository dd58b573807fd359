//! Common Types for the RLC Stack
//!
//! Defines fundamental types shared between the RLC implementation and its peers

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Sentinel for a PDCP sequence number that is not (or no longer) known
pub const INVALID_PDCP_SN: u32 = u32::MAX;

/// Sentinel for an RLC sequence number that is not (or no longer) known
pub const INVALID_RLC_SN: u32 = u32::MAX;

/// Number of radio bearers addressable by an LCID
pub const MAX_RADIO_BEARERS: u32 = 32;

/// Logical Channel Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u32);

impl Lcid {
    /// SRB0, always present in transparent mode
    pub const SRB0: Self = Self(0);

    /// Create a new LCID with validation
    pub fn new(value: u32) -> Option<Self> {
        if value < MAX_RADIO_BEARERS {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the LCID value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Bearer name used as log prefix
    pub fn rb_name(&self) -> String {
        match self.0 {
            0..=2 => format!("SRB{}", self.0),
            n => format!("DRB{}", n - 2),
        }
    }
}

impl std::fmt::Display for Lcid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Radio access technology of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rat {
    /// LTE (TS 36.322)
    Lte,
    /// 5G NR (TS 38.322)
    Nr,
}

/// RLC operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlcMode {
    /// Transparent Mode
    Tm,
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

impl std::fmt::Display for RlcMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RlcMode::Tm => "TM",
            RlcMode::Um => "UM",
            RlcMode::Am => "AM",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// LTE Framing Info field (2 bits)
    ///
    /// The empty set means the PDU starts and ends on SDU boundaries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FramingInfo: u8 {
        /// Last byte of the data field is not the last byte of an SDU
        const NOT_END_ALIGNED = 0b01;
        /// First byte of the data field is not the first byte of an SDU
        const NOT_START_ALIGNED = 0b10;
    }
}

impl FramingInfo {
    /// Both edges aligned with SDU boundaries
    pub const START_AND_END_ALIGNED: Self = Self::empty();

    /// Neither edge aligned with an SDU boundary
    pub const NOT_START_OR_END_ALIGNED: Self = Self::all();

    /// Decode from the two low bits of a header byte
    pub fn from_field(bits: u8) -> Self {
        Self::from_bits_truncate(bits & 0x03)
    }

    /// First byte of the data field starts an SDU
    pub fn is_start_aligned(self) -> bool {
        !self.contains(Self::NOT_START_ALIGNED)
    }

    /// Last byte of the data field ends an SDU
    pub fn is_end_aligned(self) -> bool {
        !self.contains(Self::NOT_END_ALIGNED)
    }
}

/// NR Segmentation Info field (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, ToPrimitive)]
pub enum SegmentInfo {
    /// Data field contains all bytes of an SDU
    #[default]
    FullSdu = 0b00,
    /// Data field contains the first segment of an SDU
    FirstSegment = 0b01,
    /// Data field contains the last segment of an SDU
    LastSegment = 0b10,
    /// Data field contains neither the first nor the last segment
    NeitherFirstNorLast = 0b11,
}

impl SegmentInfo {
    /// Decode from the two low bits of a value
    pub fn from_field(bits: u8) -> Self {
        // All four 2-bit values are defined
        Self::from_u8(bits & 0x03).unwrap_or_default()
    }

    /// Whether a segment offset field follows the SN
    pub fn has_so(self) -> bool {
        matches!(self, SegmentInfo::LastSegment | SegmentInfo::NeitherFirstNorLast)
    }

    /// Short name used in log lines
    pub fn short_name(self) -> &'static str {
        match self {
            SegmentInfo::FullSdu => "full",
            SegmentInfo::FirstSegment => "first",
            SegmentInfo::LastSegment => "last",
            SegmentInfo::NeitherFirstNorLast => "middle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcid_validation() {
        assert!(Lcid::new(0).is_some());
        assert!(Lcid::new(31).is_some());
        assert!(Lcid::new(32).is_none());
    }

    #[test]
    fn test_rb_name() {
        assert_eq!(Lcid(1).rb_name(), "SRB1");
        assert_eq!(Lcid(3).rb_name(), "DRB1");
    }

    #[test]
    fn test_framing_info_alignment() {
        assert!(FramingInfo::from_field(0).is_start_aligned());
        assert!(FramingInfo::from_field(0).is_end_aligned());
        assert!(FramingInfo::from_field(1).is_start_aligned());
        assert!(!FramingInfo::from_field(1).is_end_aligned());
        assert!(!FramingInfo::from_field(2).is_start_aligned());
        assert!(FramingInfo::from_field(2).is_end_aligned());
        assert_eq!(FramingInfo::from_field(3), FramingInfo::NOT_START_OR_END_ALIGNED);
    }

    #[test]
    fn test_segment_info_field() {
        assert_eq!(SegmentInfo::from_field(2), SegmentInfo::LastSegment);
        assert!(SegmentInfo::NeitherFirstNorLast.has_so());
        assert!(!SegmentInfo::FirstSegment.has_so());
    }
}
