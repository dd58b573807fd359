//! Transparent Mode entity (TS 36.322 / TS 38.322 section 5.2.1)
//!
//! No header, no segmentation: SDUs go out unchanged when the grant fits them and
//! received PDUs are delivered as they are.

use super::entity::RlcEngine;
use super::metrics::RlcBearerMetrics;
use super::sdu_queue::{RlcSdu, SduQueue};
use super::RlcContext;
use crate::LayerError;
use bytes::Bytes;
use interfaces::BufferState;
use tracing::{debug, info, warn};

pub struct RlcTm {
    ctx: RlcContext,
    sdu_queue: SduQueue,
    tx_enabled: bool,
    metrics: RlcBearerMetrics,
}

impl RlcTm {
    pub fn new(ctx: RlcContext, tx_queue_length: usize) -> Self {
        info!("{}: configured in TM", ctx.rb_name);
        Self {
            ctx,
            sdu_queue: SduQueue::new(tx_queue_length),
            tx_enabled: true,
            metrics: RlcBearerMetrics::default(),
        }
    }
}

impl RlcEngine for RlcTm {
    fn write_sdu(&mut self, sdu: RlcSdu) -> Result<(), LayerError> {
        if !self.tx_enabled {
            return Err(LayerError::InvalidState("TM bearer stopped".into()));
        }
        let len = sdu.len();
        match self.sdu_queue.try_write(sdu) {
            Ok(()) => {
                self.metrics.tx_sdu(len);
                debug!(
                    "{}: tx SDU ({} B, tx_sdu_queue_len={})",
                    self.ctx.rb_name,
                    len,
                    self.sdu_queue.size()
                );
                Ok(())
            }
            Err(_) => {
                warn!("{}: tx SDU ({} B) dropped, queue full", self.ctx.rb_name, len);
                self.metrics.num_dropped_sdus += 1;
                Err(LayerError::QueueFull)
            }
        }
    }

    fn discard_sdu(&mut self, pdcp_sn: u32) -> bool {
        let discarded = self.sdu_queue.discard(pdcp_sn);
        if discarded {
            self.metrics.num_dropped_sdus += 1;
        }
        discarded
    }

    fn sdu_queue_is_full(&self) -> bool {
        self.sdu_queue.is_full()
    }

    fn has_data(&self) -> bool {
        self.tx_enabled && !self.sdu_queue.is_empty()
    }

    fn read_pdu(&mut self, nof_bytes: usize) -> Option<Bytes> {
        if !self.tx_enabled {
            return None;
        }
        let len = self.sdu_queue.front()?.len();
        if len > nof_bytes {
            debug!(
                "{}: SDU of {} B does not fit grant of {} B",
                self.ctx.rb_name, len, nof_bytes
            );
            return None;
        }
        let sdu = self.sdu_queue.read()?;
        self.metrics.tx_pdu(len);
        debug!(
            "{}: tx PDU ({} B), {} SDUs left",
            self.ctx.rb_name,
            len,
            self.sdu_queue.size()
        );
        Some(sdu.payload)
    }

    fn write_pdu(&mut self, pdu: Bytes) {
        self.metrics.rx_pdu(pdu.len());
        self.metrics.rx_sdu(pdu.len());
        self.ctx.pdcp.write_pdu(self.ctx.lcid, pdu);
    }

    fn get_buffer_state(&self) -> BufferState {
        let state = BufferState::new(self.sdu_queue.size_bytes() as u32, 0);
        self.ctx
            .report_buffer_state(state.newtx_bytes, state.prio_bytes);
        state
    }

    fn reestablish(&mut self) {
        self.sdu_queue.clear();
        self.tx_enabled = true;
    }

    fn stop(&mut self) {
        self.sdu_queue.clear();
        self.tx_enabled = false;
    }

    fn empty_queue(&mut self) {
        self.sdu_queue.clear();
    }

    fn tick(&mut self) {}

    fn metrics(&self) -> RlcBearerMetrics {
        self.metrics
    }

    fn reset_metrics(&mut self) {
        self.metrics = RlcBearerMetrics::default();
    }

    fn context_mut(&mut self) -> &mut RlcContext {
        &mut self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::testing::{payload, test_context};

    #[test]
    fn test_tm_passes_sdus_through() {
        let (ctx, pdcp, _) = test_context();
        let mut tx = RlcTm::new(ctx.clone(), 4);
        let mut rx = RlcTm::new(ctx, 4);

        tx.write_sdu(RlcSdu::unnumbered(payload(0, 20))).unwrap();
        assert_eq!(tx.get_buffer_state().newtx_bytes, 20);
        assert!(tx.read_pdu(10).is_none());
        let pdu = tx.read_pdu(20).unwrap();
        rx.write_pdu(pdu);

        assert_eq!(pdcp.sdus(), vec![payload(0, 20)]);
        assert!(tx.get_buffer_state().is_empty());
        assert_eq!(tx.metrics().num_tx_pdus, 1);
    }

    #[test]
    fn test_tm_queue_full() {
        let (ctx, _, _) = test_context();
        let mut tm = RlcTm::new(ctx, 1);
        tm.write_sdu(RlcSdu::unnumbered(payload(0, 1))).unwrap();
        assert_eq!(
            tm.write_sdu(RlcSdu::unnumbered(payload(0, 1))),
            Err(LayerError::QueueFull)
        );
        assert!(tm.sdu_queue_is_full());
        assert_eq!(tm.metrics().num_dropped_sdus, 1);
    }

    #[test]
    fn test_tm_stop_disables_tx() {
        let (ctx, _, _) = test_context();
        let mut tm = RlcTm::new(ctx, 4);
        tm.write_sdu(RlcSdu::unnumbered(payload(0, 4))).unwrap();
        tm.stop();
        assert!(tm.read_pdu(100).is_none());
        assert!(tm.write_sdu(RlcSdu::unnumbered(payload(0, 4))).is_err());
        tm.reestablish();
        assert!(tm.write_sdu(RlcSdu::unnumbered(payload(0, 4))).is_ok());
    }
}
