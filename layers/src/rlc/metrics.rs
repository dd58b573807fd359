//! Per-bearer RLC counters

use serde::Serialize;
use std::ops::AddAssign;

/// Counters of one bearer since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlcBearerMetrics {
    pub num_tx_sdus: u64,
    pub num_rx_sdus: u64,
    pub num_tx_sdu_bytes: u64,
    pub num_rx_sdu_bytes: u64,
    pub num_tx_pdus: u64,
    pub num_rx_pdus: u64,
    pub num_tx_pdu_bytes: u64,
    pub num_rx_pdu_bytes: u64,
    /// PDUs given up on: retx exhaustion (AM) or reassembly gaps (UM)
    pub num_lost_pdus: u64,
    /// SDUs that could not be reassembled
    pub num_lost_sdus: u64,
    /// SDUs refused at the queue or discarded by PDCP
    pub num_dropped_sdus: u64,
}

impl RlcBearerMetrics {
    pub(crate) fn tx_pdu(&mut self, nof_bytes: usize) {
        self.num_tx_pdus += 1;
        self.num_tx_pdu_bytes += nof_bytes as u64;
    }

    pub(crate) fn rx_pdu(&mut self, nof_bytes: usize) {
        self.num_rx_pdus += 1;
        self.num_rx_pdu_bytes += nof_bytes as u64;
    }

    pub(crate) fn tx_sdu(&mut self, nof_bytes: usize) {
        self.num_tx_sdus += 1;
        self.num_tx_sdu_bytes += nof_bytes as u64;
    }

    pub(crate) fn rx_sdu(&mut self, nof_bytes: usize) {
        self.num_rx_sdus += 1;
        self.num_rx_sdu_bytes += nof_bytes as u64;
    }
}

impl AddAssign for RlcBearerMetrics {
    fn add_assign(&mut self, other: Self) {
        self.num_tx_sdus += other.num_tx_sdus;
        self.num_rx_sdus += other.num_rx_sdus;
        self.num_tx_sdu_bytes += other.num_tx_sdu_bytes;
        self.num_rx_sdu_bytes += other.num_rx_sdu_bytes;
        self.num_tx_pdus += other.num_tx_pdus;
        self.num_rx_pdus += other.num_rx_pdus;
        self.num_tx_pdu_bytes += other.num_tx_pdu_bytes;
        self.num_rx_pdu_bytes += other.num_rx_pdu_bytes;
        self.num_lost_pdus += other.num_lost_pdus;
        self.num_lost_sdus += other.num_lost_sdus;
        self.num_dropped_sdus += other.num_dropped_sdus;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulate() {
        let mut tx = RlcBearerMetrics::default();
        tx.tx_pdu(100);
        tx.tx_sdu(90);
        let mut rx = RlcBearerMetrics::default();
        rx.rx_pdu(50);
        rx.num_lost_pdus = 2;

        tx += rx;
        assert_eq!(tx.num_tx_pdus, 1);
        assert_eq!(tx.num_rx_pdu_bytes, 50);
        assert_eq!(tx.num_lost_pdus, 2);
    }

    #[test]
    fn test_metrics_serialize() {
        let metrics = RlcBearerMetrics::default();
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["num_dropped_sdus"], 0);
    }
}
