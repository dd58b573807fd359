//! LTE Unacknowledged Mode entity (TS 36.322 section 5.1.2)
//!
//! Tx concatenates and segments SDUs into UMD PDUs using framing info and length
//! indicators. Rx reorders PDUs inside the reordering window and reassembles SDUs
//! across consecutive SNs; t-Reordering bounds how long a gap is waited for.

use super::config::UmLteConfig;
use super::entity::RlcEngine;
use super::metrics::RlcBearerMetrics;
use super::pdu::um_lte::{self, UmLteSnSize, UmdPduHeader};
use super::pdu::{li_packed_len, split_data_field, MAX_LIS};
use super::sdu_queue::{RlcSdu, SduQueue};
use super::timer::Timer;
use super::window::{SnSpace, SnWindow};
use super::{RlcContext, MAX_SDU_SIZE_LTE};
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::types::FramingInfo;
use common::utils::bytes_to_hex;
use interfaces::BufferState;
use tracing::{debug, info, trace, warn};

pub struct RlcUmLte {
    ctx: RlcContext,
    tx: UmLteTx,
    rx: UmLteRx,
}

impl RlcUmLte {
    pub fn new(ctx: RlcContext, cfg: &UmLteConfig, tx_queue_length: usize) -> Result<Self, LayerError> {
        let tx_sn_size = UmLteSnSize::from_bits(cfg.tx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("UM LTE tx SN length {}", cfg.tx_sn_field_length))
        })?;
        let rx_sn_size = UmLteSnSize::from_bits(cfg.rx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("UM LTE rx SN length {}", cfg.rx_sn_field_length))
        })?;
        info!(
            "{}: configured in UM: t_reordering={} ms, rx_sn_field_length={} bits, tx_sn_field_length={} bits",
            ctx.rb_name,
            cfg.t_reordering_ms,
            rx_sn_size.bits(),
            tx_sn_size.bits()
        );
        Ok(Self {
            tx: UmLteTx::new(tx_sn_size, tx_queue_length),
            rx: UmLteRx::new(rx_sn_size, cfg.t_reordering_ms),
            ctx,
        })
    }
}

struct UmLteTx {
    sn_size: UmLteSnSize,
    space: SnSpace,
    sdu_queue: SduQueue,
    tx_sdu: Option<RlcSdu>,
    vt_us: u32,
    tx_enabled: bool,
    metrics: RlcBearerMetrics,
}

impl UmLteTx {
    fn new(sn_size: UmLteSnSize, tx_queue_length: usize) -> Self {
        Self {
            sn_size,
            space: SnSpace::new(sn_size.bits()),
            sdu_queue: SduQueue::new(tx_queue_length),
            tx_sdu: None,
            vt_us: 0,
            tx_enabled: true,
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.sdu_queue.clear();
        self.tx_sdu = None;
        self.vt_us = 0;
    }

    fn buffered_bytes(&self) -> u32 {
        let nof_sdus = self.sdu_queue.size() + usize::from(self.tx_sdu.is_some());
        let mut nof_bytes =
            self.sdu_queue.size_bytes() + self.tx_sdu.as_ref().map(RlcSdu::len).unwrap_or(0);
        if nof_bytes > 0 {
            nof_bytes += li_packed_len(nof_sdus - 1) + self.sn_size.fixed_header_len();
        }
        nof_bytes as u32
    }

    fn build_data_pdu(&mut self, rb_name: &str, nof_bytes: usize) -> Option<Bytes> {
        if self.tx_sdu.is_none() && self.sdu_queue.is_empty() {
            return None;
        }
        let mut head_len = self.sn_size.fixed_header_len();
        if nof_bytes <= head_len + 1 {
            debug!(
                "{}: cannot build a PDU - {} bytes available, {} bytes required for header",
                rb_name, nof_bytes, head_len
            );
            return None;
        }

        let mut header = UmdPduHeader::new(self.vt_us);
        let mut data = BytesMut::with_capacity(nof_bytes);
        let mut last_li = 0usize;

        // Continue the SDU segmented in the previous PDU
        if let Some(mut sdu) = self.tx_sdu.take() {
            let to_move = (nof_bytes - head_len).min(sdu.len());
            data.extend_from_slice(&sdu.payload.split_to(to_move));
            last_li = to_move;
            header.fi |= FramingInfo::NOT_START_ALIGNED;
            trace!("{}: {} bytes of segmented SDU added", rb_name, to_move);
            if !sdu.is_empty() {
                self.tx_sdu = Some(sdu);
            }
        }

        // Pull in new SDUs while there is room for at least one data byte
        while self.tx_sdu.is_none()
            && !self.sdu_queue.is_empty()
            && header.li.len() < MAX_LIS
            && nof_bytes - data.len() > head_len
        {
            if last_li > 0 {
                header.li.push(last_li as u16);
                head_len = um_lte::packed_length(&header, self.sn_size);
                if nof_bytes - data.len() <= head_len {
                    header.li.pop();
                    break;
                }
            }
            let Some(mut sdu) = self.sdu_queue.read() else {
                break;
            };
            let to_move = (nof_bytes - data.len() - head_len).min(sdu.len());
            data.extend_from_slice(&sdu.payload.split_to(to_move));
            last_li = to_move;
            if !sdu.is_empty() {
                self.tx_sdu = Some(sdu);
            }
        }

        if self.tx_sdu.is_some() {
            header.fi |= FramingInfo::NOT_END_ALIGNED;
        }

        self.vt_us = self.space.add(self.vt_us, 1);

        let mut pdu = BytesMut::with_capacity(nof_bytes);
        um_lte::write_header(&header, self.sn_size, &mut pdu);
        pdu.extend_from_slice(&data);
        self.metrics.tx_pdu(pdu.len());
        debug!(
            "{}: tx PDU SN={} ({} B, fi={:?}, N_li={})",
            rb_name,
            header.sn,
            pdu.len(),
            header.fi,
            header.li.len()
        );
        Some(pdu.freeze())
    }
}

struct UmLteRxPdu {
    header: UmdPduHeader,
    payload: Bytes,
}

struct UmLteRx {
    sn_size: UmLteSnSize,
    space: SnSpace,
    rx_window: SnWindow<UmLteRxPdu>,
    /// Partially reassembled SDU and the SN of the PDU that ended it
    rx_sdu: BytesMut,
    rx_sdu_last_sn: Option<u32>,
    vr_ur: u32,
    vr_ux: u32,
    vr_uh: u32,
    reordering_timer: Timer,
    metrics: RlcBearerMetrics,
}

impl UmLteRx {
    fn new(sn_size: UmLteSnSize, t_reordering_ms: u32) -> Self {
        let space = SnSpace::new(sn_size.bits());
        Self {
            sn_size,
            space,
            rx_window: SnWindow::new(space.modulus() as usize),
            rx_sdu: BytesMut::new(),
            rx_sdu_last_sn: None,
            vr_ur: 0,
            vr_ux: 0,
            vr_uh: 0,
            reordering_timer: Timer::new(t_reordering_ms),
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.rx_window.clear();
        self.rx_sdu.clear();
        self.rx_sdu_last_sn = None;
        self.vr_ur = 0;
        self.vr_ux = 0;
        self.vr_uh = 0;
        self.reordering_timer.stop();
    }

    /// Offsets are relative to the lower edge of the reordering window
    fn base(&self) -> u32 {
        self.space.sub(self.vr_uh, self.space.window_size())
    }

    fn offset(&self, sn: u32) -> u32 {
        self.space.offset(sn, self.base())
    }

    fn inside_reordering_window(&self, sn: u32) -> bool {
        self.offset(sn) < self.space.window_size()
    }

    fn handle_data_pdu(&mut self, ctx: &RlcContext, pdu: Bytes) {
        self.metrics.rx_pdu(pdu.len());
        let (header, header_len) = match um_lte::read_header(&pdu, self.sn_size) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{}: dropping malformed PDU: {}", ctx.rb_name, e);
                return;
            }
        };
        let sn = header.sn;
        debug!(
            "{}: rx PDU SN={} ({} B, fi={:?}, N_li={})",
            ctx.rb_name,
            sn,
            pdu.len(),
            header.fi,
            header.li.len()
        );

        let duplicate = self.offset(self.vr_ur) < self.offset(sn)
            && self.offset(sn) < self.offset(self.vr_uh)
            && self.rx_window.has_sn(sn);
        if duplicate || self.offset(sn) < self.offset(self.vr_ur) {
            debug!(
                "{}: SN={} outside rx window [{}:{}], discarding",
                ctx.rb_name, sn, self.vr_ur, self.vr_uh
            );
            return;
        }
        if self.rx_window.has_sn(sn) {
            debug!("{}: discarding duplicate SN={}", ctx.rb_name, sn);
            return;
        }

        let payload = pdu.slice(header_len..);
        let li_total: usize = header.li.iter().map(|&li| li as usize).sum();
        if li_total >= payload.len() {
            warn!(
                "{}: LIs exceed data field ({} >= {}), dropping SN={}",
                ctx.rb_name,
                li_total,
                payload.len(),
                sn
            );
            return;
        }
        self.rx_window.insert(sn, UmLteRxPdu { header, payload });

        if !self.inside_reordering_window(sn) {
            self.vr_uh = self.space.add(sn, 1);
            let base = self.base();
            // Everything below the new window is delivered or given up on
            if !self.inside_reordering_window(self.vr_ur) {
                self.flush_until(ctx, base);
            }
        }

        while self.rx_window.has_sn(self.vr_ur) {
            self.reassemble_sn(ctx, self.vr_ur);
            self.vr_ur = self.space.add(self.vr_ur, 1);
        }

        self.update_reordering_timer(ctx);
    }

    fn update_reordering_timer(&mut self, ctx: &RlcContext) {
        if self.reordering_timer.is_running() {
            let reached = self.offset(self.vr_ux) <= self.offset(self.vr_ur);
            let left_window =
                !self.inside_reordering_window(self.vr_ux) && self.vr_ux != self.vr_uh;
            if reached || left_window {
                debug!("{}: stopping reordering timer", ctx.rb_name);
                self.reordering_timer.stop();
            }
        }
        if !self.reordering_timer.is_running() && self.offset(self.vr_uh) > self.offset(self.vr_ur) {
            debug!("{}: starting reordering timer, vr_ux={}", ctx.rb_name, self.vr_uh);
            self.reordering_timer.run();
            self.vr_ux = self.vr_uh;
        }
    }

    /// t-Reordering expired: move VR(UR) to the first missing SN at or after VR(UX)
    fn on_reordering_expired(&mut self, ctx: &RlcContext) {
        debug!(
            "{}: reordering timer expired, vr_ur={} vr_ux={} vr_uh={}",
            ctx.rb_name, self.vr_ur, self.vr_ux, self.vr_uh
        );
        let mut target = self.vr_ux;
        while self.rx_window.has_sn(target) && target != self.vr_uh {
            target = self.space.add(target, 1);
        }
        self.flush_until(ctx, target);

        if self.offset(self.vr_uh) > self.offset(self.vr_ur) {
            self.reordering_timer.run();
            self.vr_ux = self.vr_uh;
        }
    }

    /// Reassemble every stored SN in `[VR(UR), end)`, counting gaps as lost, and set VR(UR) to `end`
    fn flush_until(&mut self, ctx: &RlcContext, end: u32) {
        while self.vr_ur != end {
            if self.rx_window.has_sn(self.vr_ur) {
                self.reassemble_sn(ctx, self.vr_ur);
            } else {
                debug!("{}: SN={} lost", ctx.rb_name, self.vr_ur);
                self.metrics.num_lost_pdus += 1;
            }
            self.vr_ur = self.space.add(self.vr_ur, 1);
        }
    }

    fn drop_partial_sdu(&mut self, ctx: &RlcContext, reason: &str) {
        if !self.rx_sdu.is_empty() {
            debug!(
                "{}: dropping partial SDU of {} B ({})",
                ctx.rb_name,
                self.rx_sdu.len(),
                reason
            );
            self.rx_sdu.clear();
            self.metrics.num_lost_sdus += 1;
        }
        self.rx_sdu_last_sn = None;
    }

    fn deliver_sdu(&mut self, ctx: &RlcContext) {
        let sdu = self.rx_sdu.split().freeze();
        self.rx_sdu_last_sn = None;
        trace!("{}: rx SDU {}", ctx.rb_name, bytes_to_hex(&sdu));
        self.metrics.rx_sdu(sdu.len());
        ctx.pdcp.write_pdu(ctx.lcid, sdu);
    }

    fn reassemble_sn(&mut self, ctx: &RlcContext, sn: u32) {
        let Some(pdu) = self.rx_window.remove(sn) else {
            return;
        };
        let fi = pdu.header.fi;
        let Some(elements) = split_data_field(pdu.payload, &pdu.header.li) else {
            return;
        };

        if !self.rx_sdu.is_empty() && self.rx_sdu_last_sn != Some(self.space.sub(sn, 1)) {
            self.drop_partial_sdu(ctx, "SN gap");
        }

        let nof_elements = elements.len();
        for (i, element) in elements.into_iter().enumerate() {
            let is_last = i + 1 == nof_elements;
            if i == 0 {
                if !fi.is_start_aligned() && self.rx_sdu.is_empty() {
                    // Tail of an SDU whose head was lost
                    debug!("{}: dropping {} B segment of a lost SDU, SN={}", ctx.rb_name, element.len(), sn);
                    continue;
                }
                if fi.is_start_aligned() && !self.rx_sdu.is_empty() {
                    self.drop_partial_sdu(ctx, "new SDU started");
                }
            }
            if self.rx_sdu.len() + element.len() > MAX_SDU_SIZE_LTE {
                self.drop_partial_sdu(ctx, "reassembly overflow");
                continue;
            }
            self.rx_sdu.extend_from_slice(&element);
            if !is_last || fi.is_end_aligned() {
                self.deliver_sdu(ctx);
            } else {
                self.rx_sdu_last_sn = Some(sn);
            }
        }
    }
}

impl RlcEngine for RlcUmLte {
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
        // Deliver what can still be reassembled before resetting
        if self.rx.reordering_timer.is_running() || !self.rx.rx_window.is_empty() {
            let vr_uh = self.rx.vr_uh;
            self.rx.flush_until(&self.ctx, vr_uh);
        }
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
        if self.rx.reordering_timer.step() {
            self.rx.on_reordering_expired(&self.ctx);
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
