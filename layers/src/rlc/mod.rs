//! Radio Link Control (RLC) Layer Implementation
//!
//! Implements the LTE and 5G NR RLC sublayer according to 3GPP TS 36.322 and
//! TS 38.322: transparent mode, unacknowledged mode with segmentation and
//! reassembly, and acknowledged mode with ARQ.
//!
//! Engines are synchronous state machines driven by `write_sdu`, `read_pdu`,
//! `write_pdu` and a 1 ms `tick`. [`stack::Rlc`] manages the bearers of one
//! peer and [`task::RlcTask`] serializes all of it on a tokio task.

pub mod am_lte;
pub mod am_nr;
pub mod config;
pub mod entity;
pub mod ledger;
pub mod metrics;
pub mod pdu;
pub mod sdu_queue;
pub mod stack;
pub mod task;
pub mod timer;
pub mod tm;
pub mod um_lte;
pub mod um_nr;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AmLteConfig, AmNrConfig, RlcConfig, UmLteConfig, UmNrConfig};
pub use entity::RlcEntity;
pub use metrics::RlcBearerMetrics;
pub use sdu_queue::RlcSdu;
pub use stack::Rlc;
pub use task::{RlcCommand, RlcHandle, RlcTask};

use common::types::{Lcid, Rat};
use interfaces::{BsrCallback, PdcpRlcInterface, RrcRlcInterface};
use std::sync::Arc;

/// Largest SDU accepted on an LTE bearer, bounded by the 11-bit LI field
pub const MAX_SDU_SIZE_LTE: usize = (1 << 11) - 1;

/// Largest SDU accepted on an NR bearer
pub const MAX_SDU_SIZE_NR: usize = 9000;

/// Largest SDU accepted for the given RAT
pub fn max_sdu_size(rat: Rat) -> usize {
    match rat {
        Rat::Lte => MAX_SDU_SIZE_LTE,
        Rat::Nr => MAX_SDU_SIZE_NR,
    }
}

/// Upper-layer handles and identity shared by all parts of one bearer
#[derive(Clone)]
pub struct RlcContext {
    pub lcid: Lcid,
    /// Log prefix, e.g. "DRB1"
    pub rb_name: String,
    pub pdcp: Arc<dyn PdcpRlcInterface>,
    pub rrc: Arc<dyn RrcRlcInterface>,
    pub bsr_callback: Option<BsrCallback>,
}

impl RlcContext {
    pub fn new(lcid: Lcid, pdcp: Arc<dyn PdcpRlcInterface>, rrc: Arc<dyn RrcRlcInterface>) -> Self {
        Self {
            lcid,
            rb_name: lcid.rb_name(),
            pdcp,
            rrc,
            bsr_callback: None,
        }
    }

    /// Forward buffer occupancy to the MAC, if it registered for it
    pub fn report_buffer_state(&self, newtx_bytes: u32, prio_bytes: u32) {
        if let Some(callback) = &self.bsr_callback {
            callback(self.lcid, newtx_bytes, prio_bytes);
        }
    }
}

impl std::fmt::Debug for RlcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RlcContext")
            .field("lcid", &self.lcid)
            .field("rb_name", &self.rb_name)
            .finish_non_exhaustive()
    }
}
