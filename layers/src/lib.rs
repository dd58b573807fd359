//! Protocol Stack Layers Library
//!
//! This crate implements the Radio Link Control sublayer of the LTE/NR user plane
//! according to 3GPP TS 36.322 and TS 38.322.

pub mod rlc;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("Invalid protocol data unit")]
    InvalidPdu,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Queue full")]
    QueueFull,

    #[error("SDU of {size} bytes exceeds maximum of {max} bytes")]
    SduTooLarge { size: usize, max: usize },

    #[error("Bearer with LCID {0} not configured")]
    BearerNotFound(u32),

    #[error("Bearer with LCID {0} already exists")]
    BearerExists(u32),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Channel closed")]
    ChannelClosed,
}
