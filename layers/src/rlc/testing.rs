//! Recording PDCP/RRC doubles for unit tests

use super::RlcContext;
use bytes::Bytes;
use common::types::Lcid;
use interfaces::{PdcpRlcInterface, RrcRlcInterface};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct PdcpRecorder {
    pub sdus: Mutex<Vec<Bytes>>,
    pub delivered: Mutex<Vec<u32>>,
    pub failed: Mutex<Vec<u32>>,
}

impl PdcpRecorder {
    pub fn sdus(&self) -> Vec<Bytes> {
        self.sdus.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<u32> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<u32> {
        self.failed.lock().unwrap().clone()
    }
}

impl PdcpRlcInterface for PdcpRecorder {
    fn write_pdu(&self, _lcid: Lcid, sdu: Bytes) {
        self.sdus.lock().unwrap().push(sdu);
    }

    fn notify_delivery(&self, _lcid: Lcid, pdcp_sns: &[u32]) {
        self.delivered.lock().unwrap().extend_from_slice(pdcp_sns);
    }

    fn notify_failure(&self, _lcid: Lcid, pdcp_sns: &[u32]) {
        self.failed.lock().unwrap().extend_from_slice(pdcp_sns);
    }
}

#[derive(Default)]
pub struct RrcRecorder {
    pub max_retx: Mutex<u32>,
    pub protocol_failures: Mutex<u32>,
}

impl RrcRecorder {
    pub fn max_retx(&self) -> u32 {
        *self.max_retx.lock().unwrap()
    }

    pub fn protocol_failures(&self) -> u32 {
        *self.protocol_failures.lock().unwrap()
    }
}

impl RrcRlcInterface for RrcRecorder {
    fn max_retx_attempted(&self, _lcid: Lcid) {
        *self.max_retx.lock().unwrap() += 1;
    }

    fn protocol_failure(&self, _lcid: Lcid) {
        *self.protocol_failures.lock().unwrap() += 1;
    }
}

/// Context for DRB1 (LCID 3) wired to fresh recorders
pub fn test_context() -> (RlcContext, Arc<PdcpRecorder>, Arc<RrcRecorder>) {
    let pdcp = Arc::new(PdcpRecorder::default());
    let rrc = Arc::new(RrcRecorder::default());
    let ctx = RlcContext::new(Lcid(3), pdcp.clone(), rrc.clone());
    (ctx, pdcp, rrc)
}

/// `len` bytes counting up from `first`
pub fn payload(first: u8, len: usize) -> Bytes {
    (0..len).map(|i| first.wrapping_add(i as u8)).collect()
}
