//! Upper-layer endpoints of one simulated peer

use bytes::Bytes;
use common::types::Lcid;
use interfaces::{PdcpRlcInterface, RrcRlcInterface};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Counts what the RLC hands up instead of running a PDCP
#[derive(Debug, Default)]
pub struct PdcpSink {
    name: &'static str,
    rx_sdus: AtomicU64,
    rx_bytes: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of a [`PdcpSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PdcpSinkStats {
    pub rx_sdus: u64,
    pub rx_bytes: u64,
    pub delivered_sdus: u64,
    pub failed_sdus: u64,
}

impl PdcpSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> PdcpSinkStats {
        PdcpSinkStats {
            rx_sdus: self.rx_sdus.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            delivered_sdus: self.delivered.load(Ordering::Relaxed),
            failed_sdus: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl PdcpRlcInterface for PdcpSink {
    fn write_pdu(&self, lcid: Lcid, sdu: Bytes) {
        trace!("{}: LCID {} rx SDU ({} B)", self.name, lcid, sdu.len());
        self.rx_sdus.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(sdu.len() as u64, Ordering::Relaxed);
    }

    fn notify_delivery(&self, _lcid: Lcid, pdcp_sns: &[u32]) {
        self.delivered
            .fetch_add(pdcp_sns.len() as u64, Ordering::Relaxed);
    }

    fn notify_failure(&self, lcid: Lcid, pdcp_sns: &[u32]) {
        warn!("{}: LCID {} failed to deliver PDCP SNs {:?}", self.name, lcid, pdcp_sns);
        self.failed.fetch_add(pdcp_sns.len() as u64, Ordering::Relaxed);
    }
}

/// Logs radio link problems reported by the RLC
#[derive(Debug, Default)]
pub struct RrcSink {
    name: &'static str,
    radio_link_failures: AtomicU64,
}

impl RrcSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn radio_link_failures(&self) -> u64 {
        self.radio_link_failures.load(Ordering::Relaxed)
    }
}

impl RrcRlcInterface for RrcSink {
    fn max_retx_attempted(&self, lcid: Lcid) {
        warn!("{}: max retransmissions reached on {}", self.name, lcid.rb_name());
        self.radio_link_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn protocol_failure(&self, lcid: Lcid) {
        warn!("{}: protocol failure on {}", self.name, lcid.rb_name());
        self.radio_link_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdcp_sink_counts() {
        let sink = PdcpSink::new("ue");
        sink.write_pdu(Lcid(3), Bytes::from_static(b"hello"));
        sink.notify_delivery(Lcid(3), &[0, 1, 2]);
        sink.notify_failure(Lcid(3), &[3]);
        assert_eq!(
            sink.stats(),
            PdcpSinkStats {
                rx_sdus: 1,
                rx_bytes: 5,
                delivered_sdus: 3,
                failed_sdus: 1,
            }
        );
    }
}
