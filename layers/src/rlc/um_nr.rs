//! NR Unacknowledged Mode entity (TS 38.322 section 5.2.2)
//!
//! Complete SDUs travel without an SN. Only segmented SDUs get one, and the
//! receiver reassembles them per SN from segments keyed by segment offset.

use super::config::UmNrConfig;
use super::entity::RlcEngine;
use super::metrics::RlcBearerMetrics;
use super::pdu::um_nr::{self, UmNrPduHeader, UmNrSnSize};
use super::sdu_queue::{RlcSdu, SduQueue};
use super::timer::Timer;
use super::window::{SnSpace, SnWindow};
use super::{RlcContext, MAX_SDU_SIZE_NR};
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::types::SegmentInfo;
use interfaces::BufferState;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub struct RlcUmNr {
    ctx: RlcContext,
    tx: UmNrTx,
    rx: UmNrRx,
}

impl RlcUmNr {
    pub fn new(ctx: RlcContext, cfg: &UmNrConfig, tx_queue_length: usize) -> Result<Self, LayerError> {
        let tx_sn_size = UmNrSnSize::from_bits(cfg.tx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("UM NR tx SN length {}", cfg.tx_sn_field_length))
        })?;
        let rx_sn_size = UmNrSnSize::from_bits(cfg.rx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("UM NR rx SN length {}", cfg.rx_sn_field_length))
        })?;
        info!(
            "{}: configured in UM: sn_field_length={} bits, t_reassembly={} ms",
            ctx.rb_name,
            tx_sn_size.bits(),
            cfg.t_reassembly_ms
        );
        Ok(Self {
            tx: UmNrTx::new(tx_sn_size, tx_queue_length),
            rx: UmNrRx::new(rx_sn_size, cfg.t_reassembly_ms),
            ctx,
        })
    }
}

struct UmNrTx {
    sn_size: UmNrSnSize,
    space: SnSpace,
    sdu_queue: SduQueue,
    /// SDU being segmented and the offset of its next byte
    tx_sdu: Option<RlcSdu>,
    next_so: u32,
    tx_next: u32,
    tx_enabled: bool,
    metrics: RlcBearerMetrics,
}

impl UmNrTx {
    fn new(sn_size: UmNrSnSize, tx_queue_length: usize) -> Self {
        Self {
            sn_size,
            space: SnSpace::new(sn_size.bits()),
            sdu_queue: SduQueue::new(tx_queue_length),
            tx_sdu: None,
            next_so: 0,
            tx_next: 0,
            tx_enabled: true,
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.sdu_queue.clear();
        self.tx_sdu = None;
        self.next_so = 0;
        self.tx_next = 0;
    }

    fn segment_header_len(&self) -> usize {
        self.sn_size.min_segment_header_len() + 2
    }

    fn buffered_bytes(&self) -> u32 {
        // One byte of header per complete SDU, a full segment header for the one in progress
        let mut nof_bytes = self.sdu_queue.size_bytes() + self.sdu_queue.size();
        if let Some(sdu) = &self.tx_sdu {
            nof_bytes += sdu.len() + self.segment_header_len();
        }
        nof_bytes as u32
    }

    fn build_data_pdu(&mut self, rb_name: &str, nof_bytes: usize) -> Option<Bytes> {
        let (mut sdu, header) = match self.tx_sdu.take() {
            Some(sdu) => {
                let mut header = UmNrPduHeader::full_sdu(self.sn_size);
                header.sn = self.tx_next;
                header.so = self.next_so;
                header.si = if sdu.len() + self.segment_header_len() <= nof_bytes {
                    SegmentInfo::LastSegment
                } else {
                    SegmentInfo::NeitherFirstNorLast
                };
                (sdu, header)
            }
            None => {
                let sdu = self.sdu_queue.front()?;
                let mut header = UmNrPduHeader::full_sdu(self.sn_size);
                if sdu.len() + um_nr::packed_length(&header) > nof_bytes {
                    header.si = SegmentInfo::FirstSegment;
                    header.sn = self.tx_next;
                }
                // Leave the SDU queued if not even one data byte fits
                if nof_bytes <= um_nr::packed_length(&header) {
                    debug!(
                        "{}: cannot build a PDU - {} bytes available, {} bytes required for header",
                        rb_name,
                        nof_bytes,
                        um_nr::packed_length(&header)
                    );
                    return None;
                }
                self.next_so = 0;
                (self.sdu_queue.read()?, header)
            }
        };

        let head_len = um_nr::packed_length(&header);
        if nof_bytes <= head_len {
            debug!(
                "{}: cannot build a PDU - {} bytes available, {} bytes required for header",
                rb_name, nof_bytes, head_len
            );
            self.tx_sdu = Some(sdu);
            return None;
        }

        let to_move = (nof_bytes - head_len).min(sdu.len());
        let data = sdu.payload.split_to(to_move);
        self.next_so += to_move as u32;
        if sdu.is_empty() {
            if header.si != SegmentInfo::FullSdu {
                self.tx_next = self.space.add(self.tx_next, 1);
            }
            self.next_so = 0;
        } else {
            self.tx_sdu = Some(sdu);
        }
        let mut pdu = BytesMut::with_capacity(head_len + data.len());
        um_nr::write_header(&header, &mut pdu);
        pdu.extend_from_slice(&data);
        self.metrics.tx_pdu(pdu.len());
        if header.si == SegmentInfo::FullSdu {
            debug!("{}: tx PDU ({} B)", rb_name, pdu.len());
        } else {
            debug!(
                "{}: tx PDU SN={} SO={} ({} B, {})",
                rb_name,
                header.sn,
                header.so,
                pdu.len(),
                header.si.short_name()
            );
        }
        Some(pdu.freeze())
    }
}

/// Reassembly state of one SN
#[derive(Debug, Default)]
struct UmNrRxSdu {
    /// Segments not yet appended, keyed by SO
    segments: BTreeMap<u32, Bytes>,
    sdu: BytesMut,
    next_expected_so: u32,
    total_sdu_length: Option<u32>,
    /// Delivered, kept until RX_Next_Reassembly moves past it
    delivered: bool,
}

impl UmNrRxSdu {
    /// Append every segment that continues the SDU in order
    fn append_in_order(&mut self) {
        while let Some(entry) = self.segments.first_entry() {
            let so = *entry.key();
            if so > self.next_expected_so {
                break;
            }
            let segment = entry.remove();
            let end = so + segment.len() as u32;
            if end <= self.next_expected_so {
                // Fully overlapped by what was already appended
                continue;
            }
            let skip = (self.next_expected_so - so) as usize;
            self.sdu.extend_from_slice(&segment[skip..]);
            self.next_expected_so = end;
        }
    }

    fn is_complete(&self) -> bool {
        self.total_sdu_length == Some(self.next_expected_so)
    }

    /// Bytes are missing before the last byte received so far
    fn has_gap(&self) -> bool {
        !self.delivered && !self.segments.is_empty()
    }
}

struct UmNrRx {
    sn_size: UmNrSnSize,
    space: SnSpace,
    rx_window: SnWindow<UmNrRxSdu>,
    rx_next_reassembly: u32,
    rx_timer_trigger: u32,
    rx_next_highest: u32,
    reassembly_timer: Timer,
    metrics: RlcBearerMetrics,
}

impl UmNrRx {
    fn new(sn_size: UmNrSnSize, t_reassembly_ms: u32) -> Self {
        let space = SnSpace::new(sn_size.bits());
        Self {
            sn_size,
            space,
            rx_window: SnWindow::new(space.modulus() as usize),
            rx_next_reassembly: 0,
            rx_timer_trigger: 0,
            rx_next_highest: 0,
            reassembly_timer: Timer::new(t_reassembly_ms),
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.rx_window.clear();
        self.rx_next_reassembly = 0;
        self.rx_timer_trigger = 0;
        self.rx_next_highest = 0;
        self.reassembly_timer.stop();
    }

    /// Offsets are relative to the lower edge of the reassembly window
    fn offset(&self, sn: u32) -> u32 {
        let base = self.space.sub(self.rx_next_highest, self.space.window_size());
        self.space.offset(sn, base)
    }

    fn inside_reassembly_window(&self, sn: u32) -> bool {
        self.offset(sn) < self.space.window_size()
    }

    fn is_delivered(&self, sn: u32) -> bool {
        self.rx_window.get(sn).map(|e| e.delivered).unwrap_or(false)
    }

    fn has_missing_byte_segment(&self, sn: u32) -> bool {
        self.rx_window.get(sn).map(UmNrRxSdu::has_gap).unwrap_or(false)
    }

    /// First SN at or after `from` not yet reassembled and delivered
    fn first_undelivered(&self, from: u32) -> u32 {
        let mut sn = from;
        while sn != self.rx_next_highest && self.is_delivered(sn) {
            sn = self.space.add(sn, 1);
        }
        sn
    }

    /// Drop every entry below RX_Next_Reassembly, counting undelivered SNs in `[from, RX_Next_Reassembly)` as lost
    fn discard_below_next_reassembly(&mut self, ctx: &RlcContext, from: u32) {
        let mut sn = from;
        while self.offset(sn) < self.offset(self.rx_next_reassembly) {
            if !self.is_delivered(sn) {
                debug!("{}: SN={} lost", ctx.rb_name, sn);
                self.metrics.num_lost_pdus += 1;
            }
            sn = self.space.add(sn, 1);
        }
        let rx_next_reassembly = self.rx_next_reassembly;
        let space = self.space;
        let base = self.space.sub(self.rx_next_highest, self.space.window_size());
        self.rx_window
            .retain(|sn, _| !space.lt(sn, rx_next_reassembly, base));
    }

    fn deliver(&mut self, ctx: &RlcContext, sn: u32) {
        if let Some(entry) = self.rx_window.get_mut(sn) {
            let sdu = entry.sdu.split().freeze();
            entry.delivered = true;
            entry.segments.clear();
            debug!("{}: rx SDU SN={} ({} B)", ctx.rb_name, sn, sdu.len());
            self.metrics.rx_sdu(sdu.len());
            ctx.pdcp.write_pdu(ctx.lcid, sdu);
        }
    }

    fn handle_data_pdu(&mut self, ctx: &RlcContext, pdu: Bytes) {
        self.metrics.rx_pdu(pdu.len());
        let (header, header_len) = match um_nr::read_header(&pdu, self.sn_size) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{}: dropping malformed PDU: {}", ctx.rb_name, e);
                return;
            }
        };
        let payload = pdu.slice(header_len..);
        if payload.is_empty() {
            warn!("{}: dropping PDU without data field", ctx.rb_name);
            return;
        }

        if header.si == SegmentInfo::FullSdu {
            debug!("{}: rx SDU ({} B)", ctx.rb_name, payload.len());
            self.metrics.rx_sdu(payload.len());
            ctx.pdcp.write_pdu(ctx.lcid, payload);
            return;
        }

        let sn = header.sn;
        // [RX_Next_Highest - window, RX_Next_Reassembly) is already done with
        if self.offset(sn) < self.offset(self.rx_next_reassembly) || self.is_delivered(sn) {
            debug!("{}: discarding SN={}", ctx.rb_name, sn);
            return;
        }

        if !self.rx_window.has_sn(sn) {
            self.rx_window.insert(sn, UmNrRxSdu::default());
        }
        let Some(entry) = self.rx_window.get_mut(sn) else {
            return;
        };
        let end = header.so + payload.len() as u32;
        if header.si == SegmentInfo::LastSegment {
            entry.total_sdu_length = Some(end);
        }
        debug!(
            "{}: rx SN={} SO={} ({} B, {})",
            ctx.rb_name,
            sn,
            header.so,
            payload.len(),
            header.si.short_name()
        );
        entry.segments.insert(header.so, payload);
        entry.append_in_order();

        let overflow = end as usize > MAX_SDU_SIZE_NR
            || entry.total_sdu_length.map(|t| entry.next_expected_so > t).unwrap_or(false);
        let done = if overflow {
            warn!("{}: SN={} exceeds the SDU size, dropping it", ctx.rb_name, sn);
            // Later segments of the SN are discarded as already handled
            entry.sdu.clear();
            entry.segments.clear();
            entry.delivered = true;
            self.metrics.num_lost_sdus += 1;
            true
        } else if entry.is_complete() {
            self.deliver(ctx, sn);
            true
        } else {
            false
        };
        if done {
            if sn == self.rx_next_reassembly {
                let from = self.rx_next_reassembly;
                self.rx_next_reassembly = self.first_undelivered(sn);
                self.discard_below_next_reassembly(ctx, from);
            }
        } else if !self.inside_reassembly_window(sn) {
            self.rx_next_highest = self.space.add(sn, 1);
            let space = self.space;
            let base = space.sub(self.rx_next_highest, space.window_size());
            let mut lost = 0;
            self.rx_window.retain(|old_sn, e| {
                let keep = space.inside(old_sn, base);
                if !keep && !e.delivered {
                    lost += 1;
                }
                keep
            });
            if lost > 0 {
                debug!(
                    "{}: {} SNs left the window [{}:{}] incomplete",
                    ctx.rb_name, lost, base, self.rx_next_highest
                );
                self.metrics.num_lost_pdus += lost;
            }
            if !self.inside_reassembly_window(self.rx_next_reassembly) {
                self.rx_next_reassembly = self.first_undelivered(base);
            }
        }

        self.update_reassembly_timer(ctx);
    }

    fn update_reassembly_timer(&mut self, ctx: &RlcContext) {
        let rnr = self.rx_next_reassembly;
        let next_after_rnr = self.space.add(rnr, 1);
        if self.reassembly_timer.is_running() {
            let trigger = self.rx_timer_trigger;
            let reached = self.offset(trigger) <= self.offset(rnr);
            let left_window = !self.inside_reassembly_window(trigger) && trigger != self.rx_next_highest;
            let nothing_missing =
                self.rx_next_highest == next_after_rnr && !self.has_missing_byte_segment(rnr);
            if reached || left_window || nothing_missing {
                debug!("{}: stopping reassembly timer", ctx.rb_name);
                self.reassembly_timer.stop();
            }
        }
        if !self.reassembly_timer.is_running() && self.gap_pending() {
            self.reassembly_timer.run();
            self.rx_timer_trigger = self.rx_next_highest;
            debug!(
                "{}: starting reassembly timer, RX_Timer_Trigger={}",
                ctx.rb_name, self.rx_timer_trigger
            );
        }
    }

    fn gap_pending(&self) -> bool {
        let rnr = self.rx_next_reassembly;
        let next_after_rnr = self.space.add(rnr, 1);
        self.offset(self.rx_next_highest) > self.offset(next_after_rnr)
            || (self.rx_next_highest == next_after_rnr && self.has_missing_byte_segment(rnr))
    }

    fn on_reassembly_expired(&mut self, ctx: &RlcContext) {
        debug!(
            "{}: reassembly timer expired, RX_Next_Reassembly={} RX_Timer_Trigger={} RX_Next_Highest={}",
            ctx.rb_name, self.rx_next_reassembly, self.rx_timer_trigger, self.rx_next_highest
        );
        let from = self.rx_next_reassembly;
        self.rx_next_reassembly = self.first_undelivered(self.rx_timer_trigger);
        self.discard_below_next_reassembly(ctx, from);

        if self.gap_pending() {
            self.reassembly_timer.run();
            self.rx_timer_trigger = self.rx_next_highest;
        }
    }
}

impl RlcEngine for RlcUmNr {
    fn write_sdu(&mut self, sdu: RlcSdu) -> Result<(), LayerError> {
        if !self.tx.tx_enabled {
            return Err(LayerError::InvalidState("UM bearer stopped".into()));
        }
        let len = sdu.len();
        match self.tx.sdu_queue.try_write(sdu) {
            Ok(()) => {
                self.tx.metrics.tx_sdu(len);
                debug!(
                    "{}: tx SDU ({} B, tx_sdu_queue_len={})",
                    self.ctx.rb_name,
                    len,
                    self.tx.sdu_queue.size()
                );
                Ok(())
            }
            Err(_) => {
                warn!("{}: tx SDU ({} B) dropped, queue full", self.ctx.rb_name, len);
                self.tx.metrics.num_dropped_sdus += 1;
                Err(LayerError::QueueFull)
            }
        }
    }

    fn discard_sdu(&mut self, pdcp_sn: u32) -> bool {
        let discarded = self.tx.sdu_queue.discard(pdcp_sn);
        if discarded {
            self.tx.metrics.num_dropped_sdus += 1;
        }
        discarded
    }

    fn sdu_queue_is_full(&self) -> bool {
        self.tx.sdu_queue.is_full()
    }

    fn has_data(&self) -> bool {
        self.tx.tx_enabled && (self.tx.tx_sdu.is_some() || !self.tx.sdu_queue.is_empty())
    }

    fn read_pdu(&mut self, nof_bytes: usize) -> Option<Bytes> {
        if !self.tx.tx_enabled {
            return None;
        }
        self.tx.build_data_pdu(&self.ctx.rb_name, nof_bytes)
    }

    fn write_pdu(&mut self, pdu: Bytes) {
        self.rx.handle_data_pdu(&self.ctx, pdu);
    }

    fn get_buffer_state(&self) -> BufferState {
        let state = BufferState::new(self.tx.buffered_bytes(), 0);
        self.ctx
            .report_buffer_state(state.newtx_bytes, state.prio_bytes);
        state
    }

    fn reestablish(&mut self) {
        self.rx.reset();
        self.tx.reset();
        self.tx.tx_enabled = true;
    }

    fn stop(&mut self) {
        self.rx.reset();
        self.tx.reset();
        self.tx.tx_enabled = false;
    }

    fn empty_queue(&mut self) {
        self.tx.sdu_queue.clear();
    }

    fn tick(&mut self) {
        if self.rx.reassembly_timer.step() {
            self.rx.on_reassembly_expired(&self.ctx);
        }
    }

    fn metrics(&self) -> RlcBearerMetrics {
        let mut metrics = self.tx.metrics;
        metrics += self.rx.metrics;
        metrics
    }

    fn reset_metrics(&mut self) {
        self.tx.metrics = RlcBearerMetrics::default();
        self.rx.metrics = RlcBearerMetrics::default();
    }

    fn context_mut(&mut self) -> &mut RlcContext {
        &mut self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::testing::{payload, test_context, PdcpRecorder};
    use std::sync::Arc;

    fn um_pair(sn_bits: u8) -> (RlcUmNr, RlcUmNr, Arc<PdcpRecorder>) {
        let (ctx, pdcp, _) = test_context();
        let cfg = UmNrConfig {
            tx_sn_field_length: sn_bits,
            rx_sn_field_length: sn_bits,
            t_reassembly_ms: 5,
        };
        let tx = RlcUmNr::new(ctx.clone(), &cfg, 16).unwrap();
        let rx = RlcUmNr::new(ctx, &cfg, 16).unwrap();
        (tx, rx, pdcp)
    }

    fn segment(sn: u32, si: SegmentInfo, so: u32, data: &[u8]) -> Bytes {
        let header = UmNrPduHeader {
            si,
            sn_size: UmNrSnSize::Size6Bits,
            sn,
            so,
        };
        let mut pdu = BytesMut::new();
        um_nr::write_header(&header, &mut pdu);
        pdu.extend_from_slice(data);
        pdu.freeze()
    }

    /// SDU `sn` sent as two 5 byte segments
    fn split_sdu(sn: u32) -> (Bytes, Bytes, Bytes) {
        let sdu = payload(sn as u8 * 10, 10);
        (
            segment(sn, SegmentInfo::FirstSegment, 0, &sdu[..5]),
            segment(sn, SegmentInfo::LastSegment, 5, &sdu[5..]),
            sdu,
        )
    }

    #[test]
    fn test_full_sdu_has_no_sn() {
        let (mut tx, mut rx, pdcp) = um_pair(6);
        tx.write_sdu(RlcSdu::new(0, payload(0, 4))).unwrap();
        assert_eq!(tx.get_buffer_state().newtx_bytes, 5);
        let pdu = tx.read_pdu(100).unwrap();
        assert_eq!(&pdu[..], &[0x00, 0, 1, 2, 3]);
        assert_eq!(tx.tx.tx_next, 0);
        rx.write_pdu(pdu);
        assert_eq!(pdcp.sdus(), vec![payload(0, 4)]);
    }

    #[test]
    fn test_segmentation_and_reassembly() {
        let (mut tx, mut rx, pdcp) = um_pair(6);
        tx.write_sdu(RlcSdu::new(0, payload(0, 30))).unwrap();
        let pdus: Vec<Bytes> = std::iter::from_fn(|| tx.read_pdu(10)).collect();
        assert_eq!(pdus.len(), 4);
        assert!(pdus.iter().all(|pdu| pdu.len() <= 10));
        assert_eq!(tx.tx.tx_next, 1);

        let (first, _) = um_nr::read_header(&pdus[0], UmNrSnSize::Size6Bits).unwrap();
        assert_eq!(first.si, SegmentInfo::FirstSegment);
        let (last, _) = um_nr::read_header(&pdus[3], UmNrSnSize::Size6Bits).unwrap();
        assert_eq!(last.si, SegmentInfo::LastSegment);
        assert_eq!(last.so, 23);

        for pdu in pdus {
            rx.write_pdu(pdu);
        }
        assert_eq!(pdcp.sdus(), vec![payload(0, 30)]);
        assert_eq!(rx.rx.rx_next_reassembly, 1);
        assert!(!rx.rx.reassembly_timer.is_running());
    }

    #[test]
    fn test_12bit_segments() {
        let (mut tx, mut rx, pdcp) = um_pair(12);
        tx.write_sdu(RlcSdu::new(0, payload(0, 20))).unwrap();
        tx.write_sdu(RlcSdu::new(1, payload(50, 3))).unwrap();
        while let Some(pdu) = tx.read_pdu(9) {
            rx.write_pdu(pdu);
        }
        assert_eq!(pdcp.sdus(), vec![payload(0, 20), payload(50, 3)]);
    }

    #[test]
    fn test_out_of_order_segments() {
        let (_, mut rx, pdcp) = um_pair(6);
        let (first, last, sdu) = split_sdu(0);
        rx.write_pdu(last);
        assert!(pdcp.sdus().is_empty());
        assert!(rx.rx.reassembly_timer.is_running());
        rx.write_pdu(first);
        assert_eq!(pdcp.sdus(), vec![sdu]);
        assert!(!rx.rx.reassembly_timer.is_running());
    }

    #[test]
    fn test_loss_then_recovery() {
        let (_, mut rx, pdcp) = um_pair(6);
        let sdus: Vec<_> = (0..4).map(split_sdu).collect();
        for sn in [0usize, 1, 3] {
            rx.write_pdu(sdus[sn].0.clone());
            rx.write_pdu(sdus[sn].1.clone());
        }
        assert_eq!(pdcp.sdus().len(), 3);
        assert_eq!(rx.rx.rx_next_reassembly, 2);
        assert!(rx.rx.reassembly_timer.is_running());

        for _ in 0..5 {
            rx.tick();
        }
        assert_eq!(rx.rx.rx_next_reassembly, 4);
        assert_eq!(rx.metrics().num_lost_pdus, 1);
        assert!(!rx.rx.reassembly_timer.is_running());
        assert!(rx.rx.rx_window.is_empty());

        // SN 2 is below RX_Next_Reassembly now
        rx.write_pdu(sdus[2].0.clone());
        assert!(rx.rx.rx_window.is_empty());
    }

    #[test]
    fn test_window_slide_discards_stale_segments() {
        let (_, mut rx, pdcp) = um_pair(6);
        let (first, _, _) = split_sdu(0);
        rx.write_pdu(first);
        assert_eq!(rx.rx.rx_next_highest, 1);

        // Window is [33, 1) now; SN 32 moves it to [1, 33)
        rx.write_pdu(segment(32, SegmentInfo::FirstSegment, 0, &[1, 2, 3]));
        assert_eq!(rx.rx.rx_next_highest, 33);
        assert!(!rx.rx.rx_window.has_sn(0));
        assert_eq!(rx.rx.rx_next_reassembly, 1);
        assert_eq!(rx.metrics().num_lost_pdus, 1);
        assert!(pdcp.sdus().is_empty());
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let (_, mut rx, pdcp) = um_pair(6);
        rx.write_pdu(Bytes::from_static(&[0x01, 0xAA]));
        assert!(pdcp.sdus().is_empty());
    }

    #[test]
    fn test_reassembly_overflow_drops_sdu() {
        let (_, mut rx, pdcp) = um_pair(6);
        rx.write_pdu(segment(0, SegmentInfo::FirstSegment, 0, &[0; 10]));
        rx.write_pdu(segment(0, SegmentInfo::LastSegment, MAX_SDU_SIZE_NR as u32 - 5, &[0; 10]));
        assert!(pdcp.sdus().is_empty());
        assert_eq!(rx.metrics().num_lost_sdus, 1);
        assert_eq!(rx.metrics().num_lost_pdus, 0);
        assert_eq!(rx.rx.rx_next_reassembly, 1);
        assert!(rx.rx.rx_window.is_empty());

        // Late bytes of the dropped SDU are ignored
        rx.write_pdu(segment(0, SegmentInfo::NeitherFirstNorLast, 10, &[0; 10]));
        assert!(rx.rx.rx_window.is_empty());

        let (first, last, sdu) = split_sdu(1);
        rx.write_pdu(first);
        rx.write_pdu(last);
        assert_eq!(pdcp.sdus(), vec![sdu]);
        assert_eq!(rx.rx.rx_next_reassembly, 2);
    }

    #[test]
    fn test_reestablish_drops_everything() {
        let (mut tx, mut rx, pdcp) = um_pair(6);
        tx.write_sdu(RlcSdu::new(0, payload(0, 30))).unwrap();
        let first = tx.read_pdu(10).unwrap();
        rx.write_pdu(first);
        tx.reestablish();
        rx.reestablish();
        rx.reestablish();
        assert!(tx.get_buffer_state().is_empty());
        assert_eq!(tx.tx.tx_next, 0);
        assert!(rx.rx.rx_window.is_empty());
        assert!(pdcp.sdus().is_empty());
    }
}
