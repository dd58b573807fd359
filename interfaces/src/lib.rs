//! Inter-Layer Interfaces Library
//! 
//! This crate defines the contracts between the RLC sublayer and its neighbours:
//! PDCP above, MAC below and RRC on the control plane.

pub mod message_types;
pub mod rlc;

pub use message_types::BufferState;
pub use rlc::{BsrCallback, MacRlcInterface, PdcpRlcInterface, RrcRlcInterface};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    
    #[error("Invalid message format")]
    InvalidMessage,
    
    #[error("Unknown logical channel {0}")]
    UnknownLcid(u32),
    
    #[error("Buffer full")]
    BufferFull,
}
