//! Interfaces seen by the RLC sublayer
//!
//! The RLC engines call upwards through [`PdcpRlcInterface`] and [`RrcRlcInterface`];
//! the MAC scheduler pulls and pushes PDUs through [`MacRlcInterface`].

use crate::{BufferState, InterfaceError};
use async_trait::async_trait;
use bytes::Bytes;
use common::types::Lcid;
use std::sync::Arc;

/// Callback reporting buffer occupancy: `(lcid, newtx_bytes, prio_bytes)`
pub type BsrCallback = Arc<dyn Fn(Lcid, u32, u32) + Send + Sync>;

/// PDCP services used by RLC
pub trait PdcpRlcInterface: Send + Sync {
    /// Deliver a reassembled SDU
    fn write_pdu(&self, lcid: Lcid, sdu: Bytes);
    
    /// All RLC segments of these PDCP SDUs were acknowledged by the peer
    fn notify_delivery(&self, lcid: Lcid, pdcp_sns: &[u32]);
    
    /// These PDCP SDUs could not be delivered (max retransmissions reached)
    fn notify_failure(&self, lcid: Lcid, pdcp_sns: &[u32]);
}

/// RRC services used by RLC
pub trait RrcRlcInterface: Send + Sync {
    /// A PDU reached the maximum number of retransmissions (radio link failure)
    fn max_retx_attempted(&self, lcid: Lcid);
    
    /// The AM state machine detected an inconsistent window
    fn protocol_failure(&self, lcid: Lcid);
}

/// RLC services used by the MAC scheduler
#[async_trait]
pub trait MacRlcInterface: Send + Sync {
    /// Build a PDU of at most `nof_bytes`, `None` if there is nothing to send
    async fn read_pdu(&self, lcid: Lcid, nof_bytes: usize) -> Result<Option<Bytes>, InterfaceError>;
    
    /// Hand a received PDU to the bearer
    async fn write_pdu(&self, lcid: Lcid, pdu: Bytes) -> Result<(), InterfaceError>;
    
    /// Pending bytes of the bearer
    async fn get_buffer_state(&self, lcid: Lcid) -> Result<BufferState, InterfaceError>;
}
