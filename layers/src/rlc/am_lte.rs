//! LTE Acknowledged Mode entity (TS 36.322 section 5.1.3)
//!
//! The transmitter concatenates SDUs into AMD PDUs, keeps them in the Tx window
//! until the peer acknowledges them and re-segments retransmissions to fit the
//! grant. The receiver reorders, rebuilds re-segmented PDUs, reassembles SDUs
//! and reports its state in STATUS PDUs.
//!
//! ```text
//!   Tx:  VT(A) ........ VT(S) ........ VT(MS) = VT(A) + 512
//!        oldest unacked  next new SN    first SN that does not fit
//!   Rx:  VR(R) ... VR(MS) ... VR(H) ... VR(MR) = VR(R) + 512
//! ```

use super::config::AmLteConfig;
use super::entity::RlcEngine;
use super::ledger::{SegmentLedger, SegmentList};
use super::metrics::RlcBearerMetrics;
use super::pdu::am_lte::{self, AmdPduHeader, NackInfo, StatusPdu, SO_END_OF_PDU};
use super::pdu::{is_data_pdu, li_packed_len, split_data_field, MAX_LIS};
use super::sdu_queue::{RlcSdu, SduQueue};
use super::timer::Timer;
use super::window::{RetxEntry, RetxQueue, SnSpace, SnWindow};
use super::{RlcContext, MAX_SDU_SIZE_LTE};
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::types::FramingInfo;
use common::utils::bytes_to_hex;
use interfaces::BufferState;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, trace, warn};

const SN_BITS: u8 = 10;

/// Two header bytes plus one data byte
const MIN_DATA_PDU_SIZE: usize = 3;

/// Poll every N PDUs when both poll triggers are disabled
const POLL_PERIODICITY: u32 = 8;

pub struct RlcAmLte {
    ctx: RlcContext,
    tx: AmLteTx,
    rx: AmLteRx,
}

impl RlcAmLte {
    pub fn new(ctx: RlcContext, cfg: &AmLteConfig, tx_queue_length: usize) -> Self {
        info!(
            "{}: configured in AM: t_poll_retx={} ms, poll_pdu={:?}, poll_byte={:?}, max_retx_thresh={}, t_reordering={} ms, t_status_prohibit={} ms",
            ctx.rb_name,
            cfg.t_poll_retx_ms,
            cfg.poll_pdu,
            cfg.poll_byte,
            cfg.max_retx_threshold,
            cfg.t_reordering_ms,
            cfg.t_status_prohibit_ms
        );
        Self {
            tx: AmLteTx::new(cfg, tx_queue_length),
            rx: AmLteRx::new(cfg.t_reordering_ms),
            ctx,
        }
    }

    fn status_due(&self) -> bool {
        self.rx.do_status && !self.tx.status_prohibit_timer.is_running()
    }

    fn build_status_pdu(&mut self, nof_bytes: usize) -> Option<Bytes> {
        let Some(status) = self.rx.build_status(nof_bytes) else {
            debug!(
                "{}: cannot tx status PDU - {} bytes available",
                self.ctx.rb_name, nof_bytes
            );
            return None;
        };
        let mut pdu = BytesMut::with_capacity(status.packed_length());
        status.write(&mut pdu);
        self.rx.do_status = false;
        self.rx.pending_poll = None;
        if self.tx.cfg.t_status_prohibit_ms > 0 {
            self.tx.status_prohibit_timer.run();
        }
        self.tx.metrics.tx_pdu(pdu.len());
        info!(
            "{}: tx status PDU ACK_SN={}, N_nack={} ({} B)",
            self.ctx.rb_name,
            status.ack_sn,
            status.nacks.len(),
            pdu.len()
        );
        Some(pdu.freeze())
    }
}

struct AmLteTxPdu {
    header: AmdPduHeader,
    payload: Bytes,
    retx_count: u32,
    /// PDCP SDUs whose bytes travel in this PDU
    segments: SegmentList,
}

struct AmLteTx {
    cfg: AmLteConfig,
    space: SnSpace,
    sdu_queue: SduQueue,
    tx_sdu: Option<RlcSdu>,
    tx_window: SnWindow<AmLteTxPdu>,
    retx_queue: RetxQueue,
    ledger: SegmentLedger,
    vt_a: u32,
    vt_s: u32,
    poll_sn: u32,
    pdu_without_poll: u32,
    byte_without_poll: u32,
    poll_retx_timer: Timer,
    status_prohibit_timer: Timer,
    tx_enabled: bool,
    metrics: RlcBearerMetrics,
}

impl AmLteTx {
    fn new(cfg: &AmLteConfig, tx_queue_length: usize) -> Self {
        let space = SnSpace::new(SN_BITS);
        Self {
            cfg: cfg.clone(),
            space,
            sdu_queue: SduQueue::new(tx_queue_length),
            tx_sdu: None,
            tx_window: SnWindow::new(space.window_size() as usize),
            retx_queue: RetxQueue::new(space.window_size() as usize),
            ledger: SegmentLedger::new(),
            vt_a: 0,
            vt_s: 0,
            poll_sn: 0,
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_retx_timer: Timer::new(cfg.t_poll_retx_ms),
            status_prohibit_timer: Timer::new(cfg.t_status_prohibit_ms),
            tx_enabled: true,
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.sdu_queue.clear();
        self.tx_sdu = None;
        self.tx_window.clear();
        self.retx_queue.clear();
        self.ledger.clear();
        self.vt_a = 0;
        self.vt_s = 0;
        self.poll_sn = 0;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_retx_timer.stop();
        self.status_prohibit_timer.stop();
    }

    fn window_full(&self) -> bool {
        self.space.offset(self.vt_s, self.vt_a) >= self.space.window_size()
    }

    fn has_data(&self) -> bool {
        !self.retx_queue.is_empty() || self.tx_sdu.is_some() || !self.sdu_queue.is_empty()
    }

    /// Bytes of new data including an estimate of the LI and fixed header overhead
    fn new_tx_bytes(&self) -> usize {
        if self.window_full() {
            return 0;
        }
        let nof_sdus = self.sdu_queue.size() + usize::from(self.tx_sdu.is_some());
        let mut nof_bytes =
            self.sdu_queue.size_bytes() + self.tx_sdu.as_ref().map(RlcSdu::len).unwrap_or(0);
        if nof_sdus > 1 {
            nof_bytes += li_packed_len(nof_sdus - 1);
        }
        if nof_bytes > 0 {
            nof_bytes += am_lte::FIXED_HEADER_LEN;
        }
        nof_bytes
    }

    fn poll_required(&self) -> bool {
        if matches!(self.cfg.poll_pdu, Some(n) if n > 0 && self.pdu_without_poll > n) {
            return true;
        }
        if matches!(self.cfg.poll_byte, Some(n) if n > 0 && self.byte_without_poll > n) {
            return true;
        }
        if self.poll_retx_timer.is_expired() {
            return true;
        }
        if self.window_full() {
            return true;
        }
        if self.sdu_queue.is_empty() && self.tx_sdu.is_none() && self.retx_queue.is_empty() {
            return true;
        }
        // Zero counts as infinity
        !matches!(self.cfg.poll_pdu, Some(n) if n > 0)
            && !matches!(self.cfg.poll_byte, Some(n) if n > 0)
            && self.vt_s % POLL_PERIODICITY == 0
    }

    /// Account for a PDU about to be sent and set its poll bit if a trigger fired
    fn update_poll(&mut self, rb_name: &str, header: &mut AmdPduHeader, nof_bytes: usize, poll_sn: u32) {
        self.pdu_without_poll += 1;
        self.byte_without_poll += nof_bytes as u32;
        if self.poll_required() {
            trace!("{}: setting poll bit, POLL_SN={}", rb_name, poll_sn);
            header.p = true;
            self.poll_sn = poll_sn;
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.poll_retx_timer.run();
        }
    }

    fn check_max_retx(&mut self, ctx: &RlcContext, sn: u32) {
        let Some(pdu) = self.tx_window.get(sn) else {
            return;
        };
        if pdu.retx_count == self.cfg.max_retx_threshold {
            warn!(
                "{}: signaling max number of reTx={} for SN={}",
                ctx.rb_name, pdu.retx_count, sn
            );
            ctx.rrc.max_retx_attempted(ctx.lcid);
            let pdcp_sns = self.ledger.pdcp_sns(&pdu.segments);
            ctx.pdcp.notify_failure(ctx.lcid, &pdcp_sns);
            self.metrics.num_lost_pdus += 1;
        }
    }

    /// Queue the complete PDU `sn` for retransmission
    fn retransmit_pdu(&mut self, ctx: &RlcContext, sn: u32) {
        let Some(pdu) = self.tx_window.get_mut(sn) else {
            warn!("{}: cannot retransmit SN={}, not in Tx window", ctx.rb_name, sn);
            return;
        };
        pdu.retx_count += 1;
        let so_end = pdu.payload.len() as u32;
        self.check_max_retx(ctx, sn);
        if self.retx_queue.has_sn(sn) {
            return;
        }
        debug!("{}: schedule SN={} for retx", ctx.rb_name, sn);
        let entry = RetxEntry {
            sn,
            is_segment: false,
            so_start: 0,
            so_end,
        };
        if !self.retx_queue.push(entry) {
            warn!("{}: retx queue full, SN={} not scheduled", ctx.rb_name, sn);
        }
    }

    fn required_buffer_size(&self, retx: &RetxEntry) -> Option<usize> {
        let pdu = self.tx_window.get(retx.sn)?;
        if !retx.is_segment {
            return Some(am_lte::packed_length(&pdu.header) + pdu.payload.len());
        }
        let header = segment_header(&pdu.header, pdu.payload.len() as u32, retx.so_start, retx.so_end);
        Some(am_lte::packed_length(&header) + (retx.so_end - retx.so_start) as usize)
    }

    fn build_retx_pdu(&mut self, ctx: &RlcContext, nof_bytes: usize) -> Option<Bytes> {
        // Entries acknowledged in the meantime
        while let Some(front) = self.retx_queue.front() {
            if self.tx_window.has_sn(front.sn) {
                break;
            }
            self.retx_queue.pop();
        }
        let retx = *self.retx_queue.front()?;
        let Some(required) = self.required_buffer_size(&retx) else {
            self.retx_queue.pop();
            return None;
        };
        if retx.is_segment || required > nof_bytes {
            debug!("{}: resegmentation of SN={} required", ctx.rb_name, retx.sn);
            return self.build_segment(ctx, nof_bytes, retx);
        }

        let pdu = self.tx_window.get(retx.sn)?;
        let mut header = pdu.header.clone();
        header.p = false;
        let payload = pdu.payload.clone();
        let attempt = pdu.retx_count;
        self.retx_queue.pop();

        let poll_sn = self.space.sub(self.vt_s, 1);
        self.update_poll(&ctx.rb_name, &mut header, required, poll_sn);

        let mut buf = BytesMut::with_capacity(required);
        am_lte::write_data_pdu_header(&header, &mut buf);
        buf.extend_from_slice(&payload);
        self.metrics.tx_pdu(buf.len());
        info!(
            "{}: retx PDU SN={} ({} B) (attempt {}/{})",
            ctx.rb_name,
            retx.sn,
            buf.len(),
            attempt,
            self.cfg.max_retx_threshold
        );
        Some(buf.freeze())
    }

    /// Send the byte range `[so_start, so_end)` of a PDU, or as much of it as fits, as an AMD PDU segment
    fn build_segment(&mut self, ctx: &RlcContext, nof_bytes: usize, retx: RetxEntry) -> Option<Bytes> {
        let (orig_header, payload, attempt) = {
            let pdu = self.tx_window.get(retx.sn)?;
            (pdu.header.clone(), pdu.payload.clone(), pdu.retx_count)
        };
        let pdu_len = payload.len() as u32;
        let (start, range_end) = if retx.is_segment {
            (retx.so_start, retx.so_end.min(pdu_len))
        } else {
            (0, pdu_len)
        };
        if start >= range_end {
            warn!(
                "{}: dropping invalid retx range [{}, {}) of SN={}",
                ctx.rb_name, start, range_end, retx.sn
            );
            self.retx_queue.pop();
            return None;
        }

        let mut end = range_end;
        let mut header = segment_header(&orig_header, pdu_len, start, end);
        while am_lte::packed_length(&header) + (end - start) as usize > nof_bytes {
            let fit = nof_bytes.saturating_sub(am_lte::packed_length(&header)) as u32;
            if fit == 0 {
                debug!(
                    "{}: cannot build a PDU segment - {} bytes available",
                    ctx.rb_name, nof_bytes
                );
                return None;
            }
            end = (start + fit).min(end - 1);
            header = segment_header(&orig_header, pdu_len, start, end);
        }

        if end >= range_end {
            self.retx_queue.pop();
        } else if let Some(front) = self.retx_queue.front_mut() {
            front.is_segment = true;
            front.so_start = end;
            front.so_end = range_end;
        }

        let data = payload.slice(start as usize..end as usize);
        let nof_pdu_bytes = am_lte::packed_length(&header) + data.len();
        let poll_sn = self.space.sub(self.vt_s, 1);
        self.update_poll(&ctx.rb_name, &mut header, nof_pdu_bytes, poll_sn);

        let mut buf = BytesMut::with_capacity(nof_pdu_bytes);
        am_lte::write_data_pdu_header(&header, &mut buf);
        buf.extend_from_slice(&data);
        self.metrics.tx_pdu(buf.len());
        info!(
            "{}: retx PDU segment SN={} [so={}:{}] ({} B) (attempt {}/{})",
            ctx.rb_name,
            retx.sn,
            start,
            end,
            buf.len(),
            attempt,
            self.cfg.max_retx_threshold
        );
        Some(buf.freeze())
    }

    fn track_segment(&mut self, ctx: &RlcContext, rlc_sn: u32, segments: &mut SegmentList, pdcp_sn: u32) {
        if !self.ledger.make_segment(rlc_sn, segments, pdcp_sn) {
            trace!("{}: PDCP SN={} not tracked for delivery", ctx.rb_name, pdcp_sn);
        }
    }

    fn build_data_pdu(&mut self, ctx: &RlcContext, nof_bytes: usize) -> Option<Bytes> {
        if self.tx_sdu.is_none() && self.sdu_queue.is_empty() {
            return None;
        }
        if self.window_full() {
            debug!("{}: cannot build data PDU - Tx window full", ctx.rb_name);
            return None;
        }
        if nof_bytes < MIN_DATA_PDU_SIZE {
            debug!(
                "{}: cannot build data PDU - {} bytes available, at least {} required",
                ctx.rb_name, nof_bytes, MIN_DATA_PDU_SIZE
            );
            return None;
        }
        if !self.ledger.has_segments() {
            warn!("{}: cannot build data PDU - no segments available", ctx.rb_name);
            return None;
        }

        let sn = self.vt_s;
        let mut header = AmdPduHeader::new(sn);
        let mut head_len = am_lte::packed_length(&header);
        let mut data = BytesMut::with_capacity(nof_bytes);
        let mut segments = SegmentList::default();
        let mut last_li = 0usize;

        if let Some(mut sdu) = self.tx_sdu.take() {
            let to_move = (nof_bytes - head_len).min(sdu.len());
            data.extend_from_slice(&sdu.payload.split_to(to_move));
            last_li = to_move;
            self.track_segment(ctx, sn, &mut segments, sdu.pdcp_sn);
            header.fi |= FramingInfo::NOT_START_ALIGNED;
            if sdu.is_empty() {
                self.ledger.set_fully_txed(sdu.pdcp_sn);
            } else {
                self.tx_sdu = Some(sdu);
            }
        }

        while self.tx_sdu.is_none()
            && !self.sdu_queue.is_empty()
            && header.li.len() < MAX_LIS
            && nof_bytes - data.len() > head_len
        {
            if !self.ledger.has_segments() {
                warn!("{}: no segment resources left, closing PDU", ctx.rb_name);
                break;
            }
            if last_li > 0 {
                header.li.push(last_li as u16);
                head_len = am_lte::packed_length(&header);
                if head_len >= nof_bytes - data.len() {
                    header.li.pop();
                    break;
                }
            }
            let Some(mut sdu) = self.sdu_queue.read() else {
                break;
            };
            if self.ledger.has_pdcp_sn(sdu.pdcp_sn) {
                warn!("{}: PDCP SN={} already marked as undelivered", ctx.rb_name, sdu.pdcp_sn);
            } else {
                self.ledger.add_pdcp_sdu(sdu.pdcp_sn);
            }
            let to_move = (nof_bytes - data.len() - head_len).min(sdu.len());
            data.extend_from_slice(&sdu.payload.split_to(to_move));
            last_li = to_move;
            self.track_segment(ctx, sn, &mut segments, sdu.pdcp_sn);
            if sdu.is_empty() {
                self.ledger.set_fully_txed(sdu.pdcp_sn);
            } else {
                self.tx_sdu = Some(sdu);
            }
        }

        if self.tx_sdu.is_some() {
            header.fi |= FramingInfo::NOT_END_ALIGNED;
        }

        self.vt_s = self.space.add(self.vt_s, 1);
        let nof_pdu_bytes = am_lte::packed_length(&header) + data.len();
        self.update_poll(&ctx.rb_name, &mut header, nof_pdu_bytes, sn);

        let payload = data.freeze();
        let mut buf = BytesMut::with_capacity(nof_pdu_bytes);
        am_lte::write_data_pdu_header(&header, &mut buf);
        buf.extend_from_slice(&payload);
        debug!(
            "{}: tx PDU SN={} ({} B, fi={:?}, N_li={}, p={})",
            ctx.rb_name,
            sn,
            buf.len(),
            header.fi,
            header.li.len(),
            header.p
        );
        self.tx_window.insert(
            sn,
            AmLteTxPdu {
                header,
                payload,
                retx_count: 0,
                segments,
            },
        );
        self.metrics.tx_pdu(buf.len());
        Some(buf.freeze())
    }

    fn handle_status_pdu(&mut self, ctx: &RlcContext, pdu: &[u8]) {
        let status = match StatusPdu::read(pdu) {
            Ok(status) => status,
            Err(e) => {
                warn!("{}: dropping malformed status PDU: {}", ctx.rb_name, e);
                return;
            }
        };
        info!(
            "{}: rx status PDU ACK_SN={}, N_nack={}",
            ctx.rb_name,
            status.ack_sn,
            status.nacks.len()
        );

        let vt_a = self.vt_a;
        let window_size = self.space.window_size();
        if self.space.offset(status.ack_sn, vt_a) > window_size
            || self.space.offset(self.vt_s, status.ack_sn) > window_size
        {
            warn!(
                "{}: invalid status PDU (ACK_SN={}, VT(A)={}, VT(S)={}), dropping it",
                ctx.rb_name, status.ack_sn, vt_a, self.vt_s
            );
            return;
        }

        let poll_sn_reported = self.space.lt(self.poll_sn, status.ack_sn, vt_a)
            || status.nacks.iter().any(|n| n.nack_sn == self.poll_sn);
        if poll_sn_reported && self.poll_retx_timer.is_running() {
            debug!("{}: stopping t-PollRetransmit", ctx.rb_name);
            self.poll_retx_timer.stop();
        }

        // The peer reports every missing SN again, start from a clean queue
        if !status.nacks.is_empty() {
            self.retx_queue.clear();
        }

        let mut delivered = Vec::new();
        let mut update_vt_a = true;
        let mut sn = vt_a;
        while self.space.lt(sn, status.ack_sn, vt_a) && self.space.lt(sn, self.vt_s, vt_a) {
            let nacks: Vec<&NackInfo> = status.nacks.iter().filter(|n| n.nack_sn == sn).collect();
            if nacks.is_empty() {
                if let Some(mut pdu) = self.tx_window.remove(sn) {
                    trace!("{}: SN={} acknowledged", ctx.rb_name, sn);
                    self.ledger.ack_pdu(&pdu.segments, &mut delivered);
                    self.ledger.release_pdu(&mut pdu.segments);
                }
                if update_vt_a {
                    self.vt_a = self.space.add(self.vt_a, 1);
                }
            } else {
                update_vt_a = false;
                self.schedule_nack(ctx, sn, &nacks);
            }
            sn = self.space.add(sn, 1);
        }

        if !self.tx_window.is_empty() && !self.tx_window.has_sn(self.vt_a) {
            error!(
                "{}: VT(A)={} points to an invalid position in the Tx window",
                ctx.rb_name, self.vt_a
            );
            ctx.rrc.protocol_failure(ctx.lcid);
        }
        debug!(
            "{}: VT(A)={}, VT(S)={}, POLL_SN={}",
            ctx.rb_name, self.vt_a, self.vt_s, self.poll_sn
        );

        if !delivered.is_empty() {
            ctx.pdcp.notify_delivery(ctx.lcid, &delivered);
        }
    }

    /// Queue the union of all NACKed ranges of `sn` for retransmission
    fn schedule_nack(&mut self, ctx: &RlcContext, sn: u32, nacks: &[&NackInfo]) {
        let Some(pdu) = self.tx_window.get_mut(sn) else {
            warn!("{}: NACKed SN={} already removed from Tx window", ctx.rb_name, sn);
            return;
        };
        let len = pdu.payload.len() as u32;
        let mut range: Option<(u32, u32)> = None;
        let mut whole = false;
        for nack in nacks {
            match nack.so {
                Some((so_start, so_end)) => {
                    let so_start = if so_start >= len { 0 } else { so_start };
                    let so_end = if so_end == SO_END_OF_PDU {
                        len
                    } else {
                        (so_end + 1).min(len)
                    };
                    if so_start < so_end {
                        range = Some(match range {
                            Some((s, e)) => (s.min(so_start), e.max(so_end)),
                            None => (so_start, so_end),
                        });
                    } else {
                        warn!(
                            "{}: invalid segment NACK for SN={} ({}:{}), retransmitting the whole PDU",
                            ctx.rb_name, sn, so_start, so_end
                        );
                        whole = true;
                    }
                }
                None => whole = true,
            }
        }
        let mut entry = RetxEntry {
            sn,
            is_segment: false,
            so_start: 0,
            so_end: len,
        };
        if let (false, Some((so_start, so_end))) = (whole, range) {
            entry.is_segment = true;
            entry.so_start = so_start;
            entry.so_end = so_end;
        }
        pdu.retx_count += 1;
        self.check_max_retx(ctx, sn);
        debug!(
            "{}: NACK SN={} [{}:{}] queued for retx",
            ctx.rb_name, sn, entry.so_start, entry.so_end
        );
        if !self.retx_queue.push(entry) {
            warn!("{}: retx queue full, SN={} not scheduled", ctx.rb_name, sn);
        }
    }

    fn on_poll_retx_expired(&mut self, ctx: &RlcContext) {
        debug!(
            "{}: t-PollRetransmit expired after {} ms",
            ctx.rb_name,
            self.poll_retx_timer.duration()
        );
        let queues_empty =
            self.retx_queue.is_empty() && self.sdu_queue.is_empty() && self.tx_sdu.is_none();
        if queues_empty || self.window_full() {
            let vt_a = self.vt_a;
            self.retransmit_pdu(ctx, vt_a);
        }
    }
}

/// Header of the segment `[start, end)` of a PDU, with FI and LIs rebuilt from the
/// SDU boundaries of the original header
fn segment_header(orig: &AmdPduHeader, pdu_len: u32, start: u32, end: u32) -> AmdPduHeader {
    let mut boundaries = Vec::with_capacity(orig.li.len());
    let mut pos = 0u32;
    for &li in &orig.li {
        pos += u32::from(li);
        boundaries.push(pos);
    }

    let mut header = AmdPduHeader {
        rf: true,
        sn: orig.sn,
        so: start,
        lsf: end == pdu_len,
        ..Default::default()
    };
    let start_aligned = if start == 0 {
        orig.fi.is_start_aligned()
    } else {
        boundaries.contains(&start)
    };
    let end_aligned = if end == pdu_len {
        orig.fi.is_end_aligned()
    } else {
        boundaries.contains(&end)
    };
    if !start_aligned {
        header.fi |= FramingInfo::NOT_START_ALIGNED;
    }
    if !end_aligned {
        header.fi |= FramingInfo::NOT_END_ALIGNED;
    }

    let mut prev = start;
    for &boundary in boundaries.iter().filter(|&&b| b > start && b < end) {
        header.li.push((boundary - prev) as u16);
        prev = boundary;
    }
    header
}

struct AmLteRxPdu {
    header: AmdPduHeader,
    payload: Bytes,
}

/// Received segments of one SN, keyed by SO
type RxSegments = BTreeMap<u32, AmLteRxPdu>;

/// Join the segments of a PDU once every byte up to the last segment is present
fn rebuild_pdu(segments: &RxSegments) -> Option<(AmdPduHeader, Bytes)> {
    let mut data = BytesMut::new();
    let mut boundaries = BTreeSet::new();
    let mut first_fi = FramingInfo::empty();
    let mut last: Option<(usize, FramingInfo)> = None;
    let mut sn = 0;

    for (&so, segment) in segments {
        let so = so as usize;
        if so > data.len() {
            return None;
        }
        let end = so + segment.payload.len();
        if end > data.len() {
            let skip = data.len() - so;
            data.extend_from_slice(&segment.payload[skip..]);
        }
        if so == 0 {
            first_fi = segment.header.fi;
            sn = segment.header.sn;
        } else if segment.header.fi.is_start_aligned() {
            boundaries.insert(so as u32);
        }
        let mut pos = so as u32;
        for &li in &segment.header.li {
            pos += u32::from(li);
            boundaries.insert(pos);
        }
        if segment.header.lsf {
            last = Some((end, segment.header.fi));
        } else if segment.header.fi.is_end_aligned() {
            boundaries.insert(end as u32);
        }
    }

    let (total, last_fi) = last?;
    if data.len() < total {
        return None;
    }
    data.truncate(total);

    let mut header = AmdPduHeader::new(sn);
    header.fi = (first_fi & FramingInfo::NOT_START_ALIGNED) | (last_fi & FramingInfo::NOT_END_ALIGNED);
    let mut prev = 0u32;
    for &boundary in boundaries.iter().filter(|&&b| b > 0 && (b as usize) < total) {
        header.li.push((boundary - prev) as u16);
        prev = boundary;
    }
    Some((header, data.freeze()))
}

struct AmLteRx {
    space: SnSpace,
    rx_window: SnWindow<AmLteRxPdu>,
    rx_segments: SnWindow<RxSegments>,
    rx_sdu: BytesMut,
    vr_r: u32,
    vr_x: u32,
    vr_ms: u32,
    vr_h: u32,
    reordering_timer: Timer,
    /// SN of a poll whose status is delayed until VR(MS) passes it
    pending_poll: Option<u32>,
    do_status: bool,
    metrics: RlcBearerMetrics,
}

impl AmLteRx {
    fn new(t_reordering_ms: u32) -> Self {
        let space = SnSpace::new(SN_BITS);
        Self {
            space,
            rx_window: SnWindow::new(space.window_size() as usize),
            rx_segments: SnWindow::new(space.window_size() as usize),
            rx_sdu: BytesMut::new(),
            vr_r: 0,
            vr_x: 0,
            vr_ms: 0,
            vr_h: 0,
            reordering_timer: Timer::new(t_reordering_ms),
            pending_poll: None,
            do_status: false,
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.rx_window.clear();
        self.rx_segments.clear();
        self.rx_sdu.clear();
        self.vr_r = 0;
        self.vr_x = 0;
        self.vr_ms = 0;
        self.vr_h = 0;
        self.reordering_timer.stop();
        self.pending_poll = None;
        self.do_status = false;
    }

    fn vr_mr(&self) -> u32 {
        self.space.add(self.vr_r, self.space.window_size())
    }

    fn inside_rx_window(&self, sn: u32) -> bool {
        self.space.inside(sn, self.vr_r)
    }

    fn handle_data_pdu(&mut self, ctx: &RlcContext, pdu: Bytes) {
        let (header, header_len) = match am_lte::read_data_pdu_header(&pdu) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{}: dropping malformed PDU ({} B): {}", ctx.rb_name, pdu.len(), e);
                return;
            }
        };
        let payload = pdu.slice(header_len..);
        if payload.is_empty() {
            warn!("{}: dropping PDU SN={} without data field", ctx.rb_name, header.sn);
            return;
        }
        if header.rf {
            self.handle_data_pdu_segment(ctx, header, payload);
        } else {
            self.handle_data_pdu_full(ctx, header, payload);
        }
    }

    fn discard(&mut self, ctx: &RlcContext, header: &AmdPduHeader, reason: &str) {
        if header.p {
            debug!("{}: status requested through polling bit", ctx.rb_name);
            self.do_status = true;
        }
        debug!(
            "{}: discarding SN={} ({}), rx window [{}:{}]",
            ctx.rb_name,
            header.sn,
            reason,
            self.vr_r,
            self.vr_mr()
        );
    }

    fn handle_data_pdu_full(&mut self, ctx: &RlcContext, header: AmdPduHeader, payload: Bytes) {
        let sn = header.sn;
        debug!(
            "{}: rx data PDU SN={} ({} B, fi={:?}, N_li={}, p={})",
            ctx.rb_name,
            sn,
            payload.len(),
            header.fi,
            header.li.len(),
            header.p
        );
        let li_total: usize = header.li.iter().map(|&li| li as usize).sum();
        if li_total >= payload.len() {
            warn!(
                "{}: dropping corrupted PDU SN={} (LIs {} B >= data {} B)",
                ctx.rb_name,
                sn,
                li_total,
                payload.len()
            );
            return;
        }
        if !self.inside_rx_window(sn) {
            self.discard(ctx, &header, "outside rx window");
            return;
        }
        if self.rx_window.has_sn(sn) {
            self.discard(ctx, &header, "duplicate");
            return;
        }

        let poll = header.p;
        self.rx_segments.remove(sn);
        self.rx_window.insert(sn, AmLteRxPdu { header, payload });
        self.on_pdu_placed(ctx, sn, poll);
    }

    fn handle_data_pdu_segment(&mut self, ctx: &RlcContext, header: AmdPduHeader, payload: Bytes) {
        let sn = header.sn;
        debug!(
            "{}: rx data PDU segment SN={} SO={} ({} B, lsf={}, N_li={})",
            ctx.rb_name,
            sn,
            header.so,
            payload.len(),
            header.lsf,
            header.li.len()
        );
        if !self.inside_rx_window(sn) {
            self.discard(ctx, &header, "outside rx window");
            return;
        }
        if self.rx_window.has_sn(sn) {
            self.discard(ctx, &header, "PDU already complete");
            return;
        }

        if !self.rx_segments.has_sn(sn) {
            self.rx_segments.insert(sn, RxSegments::new());
        }
        let Some(segments) = self.rx_segments.get_mut(sn) else {
            return;
        };
        let poll = header.p;
        let so = header.so;
        match segments.get(&so) {
            Some(existing) if existing.payload.len() >= payload.len() => {
                debug!("{}: duplicate segment SN={} SO={}", ctx.rb_name, sn, so);
            }
            _ => {
                segments.insert(so, AmLteRxPdu { header, payload });
            }
        }

        if let Some((header, payload)) = rebuild_pdu(segments) {
            debug!(
                "{}: all segments of SN={} received ({} B, N_li={})",
                ctx.rb_name,
                sn,
                payload.len(),
                header.li.len()
            );
            self.rx_segments.remove(sn);
            self.rx_window.insert(sn, AmLteRxPdu { header, payload });
        }
        self.on_pdu_placed(ctx, sn, poll);
    }

    /// Update the state variables after SN `sn` was placed in the reception buffer (5.1.3.2.3)
    fn on_pdu_placed(&mut self, ctx: &RlcContext, sn: u32, poll: bool) {
        if !self.space.lt(sn, self.vr_h, self.vr_r) {
            self.vr_h = self.space.add(sn, 1);
        }
        while self.rx_window.has_sn(self.vr_ms) {
            self.vr_ms = self.space.add(self.vr_ms, 1);
        }

        if poll {
            debug!("{}: status requested through polling bit", ctx.rb_name);
            self.pending_poll = Some(sn);
        }
        self.check_pending_poll();

        self.reassemble(ctx);

        if self.reordering_timer.is_running() {
            let vr_x = self.vr_x;
            if vr_x == self.vr_r || (!self.inside_rx_window(vr_x) && vr_x != self.vr_mr()) {
                debug!("{}: stopping t-Reordering", ctx.rb_name);
                self.reordering_timer.stop();
            }
        }
        if !self.reordering_timer.is_running() && self.vr_h != self.vr_r {
            debug!("{}: starting t-Reordering, VR(X)={}", ctx.rb_name, self.vr_h);
            self.reordering_timer.run();
            self.vr_x = self.vr_h;
        }
        trace!(
            "{}: VR(R)={}, VR(MR)={}, VR(X)={}, VR(MS)={}, VR(H)={}",
            ctx.rb_name,
            self.vr_r,
            self.vr_mr(),
            self.vr_x,
            self.vr_ms,
            self.vr_h
        );
    }

    /// A delayed poll is answered once VR(MS) moved past it (5.2.3)
    fn check_pending_poll(&mut self) {
        if let Some(poll_sn) = self.pending_poll {
            if self.space.lt(poll_sn, self.vr_ms, self.vr_r) {
                self.do_status = true;
                self.pending_poll = None;
            }
        }
    }

    fn reassemble(&mut self, ctx: &RlcContext) {
        while let Some(pdu) = self.rx_window.remove(self.vr_r) {
            self.rx_segments.remove(self.vr_r);
            self.reassemble_pdu(ctx, pdu);
            self.vr_r = self.space.add(self.vr_r, 1);
        }
    }

    fn drop_partial_sdu(&mut self, ctx: &RlcContext, reason: &str) {
        if !self.rx_sdu.is_empty() {
            warn!(
                "{}: dropping partial SDU of {} B ({})",
                ctx.rb_name,
                self.rx_sdu.len(),
                reason
            );
            self.rx_sdu.clear();
            self.metrics.num_lost_sdus += 1;
        }
    }

    fn reassemble_pdu(&mut self, ctx: &RlcContext, pdu: AmLteRxPdu) {
        let fi = pdu.header.fi;
        let Some(elements) = split_data_field(pdu.payload, &pdu.header.li) else {
            self.drop_partial_sdu(ctx, "corrupted PDU");
            return;
        };
        let nof_elements = elements.len();
        for (i, element) in elements.into_iter().enumerate() {
            if i == 0 {
                if !fi.is_start_aligned() && self.rx_sdu.is_empty() {
                    debug!(
                        "{}: dropping {} B tail of an SDU whose head is gone",
                        ctx.rb_name,
                        element.len()
                    );
                    continue;
                }
                if fi.is_start_aligned() {
                    self.drop_partial_sdu(ctx, "new SDU started");
                }
            }
            if self.rx_sdu.len() + element.len() > MAX_SDU_SIZE_LTE {
                self.drop_partial_sdu(ctx, "reassembly overflow");
                continue;
            }
            self.rx_sdu.extend_from_slice(&element);
            if i + 1 < nof_elements || fi.is_end_aligned() {
                let sdu = self.rx_sdu.split().freeze();
                trace!("{}: rx SDU ({} B) {}", ctx.rb_name, sdu.len(), bytes_to_hex(&sdu));
                self.metrics.rx_sdu(sdu.len());
                ctx.pdcp.write_pdu(ctx.lcid, sdu);
            }
        }
    }

    /// t-Reordering expired (5.1.3.2.4)
    fn on_reordering_expired(&mut self, ctx: &RlcContext) {
        debug!(
            "{}: t-Reordering expired, updating VR(MS) from {}",
            ctx.rb_name, self.vr_ms
        );
        self.vr_ms = self.vr_x;
        while self.rx_window.has_sn(self.vr_ms) {
            self.vr_ms = self.space.add(self.vr_ms, 1);
        }
        // The gap below VR(MS) is reported as missing
        self.do_status = true;
        self.pending_poll = None;

        if self.space.offset(self.vr_h, self.vr_r) > self.space.offset(self.vr_ms, self.vr_r) {
            self.reordering_timer.run();
            self.vr_x = self.vr_h;
        }
    }

    /// NACKs describing what is missing of `sn`
    fn push_nacks(&self, sn: u32, nacks: &mut Vec<NackInfo>) {
        match self.rx_segments.get(sn) {
            Some(segments) if !segments.is_empty() => {
                let mut cursor = 0u32;
                let mut last_received = false;
                for (&so, segment) in segments {
                    if so > cursor {
                        nacks.push(NackInfo::segment(sn, cursor, so - 1));
                    }
                    cursor = cursor.max(so + segment.payload.len() as u32);
                    last_received |= segment.header.lsf;
                }
                if !last_received {
                    nacks.push(NackInfo::segment(sn, cursor, SO_END_OF_PDU));
                }
            }
            _ => nacks.push(NackInfo::sn(sn)),
        }
    }

    /// Status of the receive window that fits in `max_len` bytes. If not all NACKs
    /// fit, ACK_SN stops at the first SN that could not be reported.
    fn build_status(&self, max_len: usize) -> Option<StatusPdu> {
        let mut status = StatusPdu::new(self.vr_ms);
        if status.packed_length() > max_len {
            return None;
        }
        let mut sn = self.vr_r;
        while sn != self.vr_ms {
            if !self.rx_window.has_sn(sn) {
                let nof_nacks = status.nacks.len();
                self.push_nacks(sn, &mut status.nacks);
                if status.packed_length() > max_len {
                    status.nacks.truncate(nof_nacks);
                    status.ack_sn = sn;
                    break;
                }
            }
            sn = self.space.add(sn, 1);
        }
        Some(status)
    }

    fn status_len(&self) -> usize {
        self.build_status(usize::MAX)
            .map(|status| status.packed_length())
            .unwrap_or(0)
    }
}

impl RlcEngine for RlcAmLte {
    fn write_sdu(&mut self, sdu: RlcSdu) -> Result<(), LayerError> {
        if !self.tx.tx_enabled {
            return Err(LayerError::InvalidState("AM bearer stopped".into()));
        }
        let len = sdu.len();
        let pdcp_sn = sdu.pdcp_sn;
        match self.tx.sdu_queue.try_write(sdu) {
            Ok(()) => {
                self.tx.metrics.tx_sdu(len);
                debug!(
                    "{}: tx SDU PDCP_SN={} ({} B, tx_sdu_queue_len={})",
                    self.ctx.rb_name,
                    pdcp_sn,
                    len,
                    self.tx.sdu_queue.size()
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    "{}: tx SDU PDCP_SN={} ({} B) dropped, queue full",
                    self.ctx.rb_name, pdcp_sn, len
                );
                self.tx.metrics.num_dropped_sdus += 1;
                Err(LayerError::QueueFull)
            }
        }
    }

    fn discard_sdu(&mut self, pdcp_sn: u32) -> bool {
        let discarded = self.tx.sdu_queue.discard(pdcp_sn);
        if discarded {
            debug!("{}: discarded SDU PDCP_SN={}", self.ctx.rb_name, pdcp_sn);
            self.tx.metrics.num_dropped_sdus += 1;
        }
        discarded
    }

    fn sdu_queue_is_full(&self) -> bool {
        self.tx.sdu_queue.is_full()
    }

    fn has_data(&self) -> bool {
        self.status_due() || self.tx.has_data()
    }

    fn read_pdu(&mut self, nof_bytes: usize) -> Option<Bytes> {
        if !self.tx.tx_enabled {
            return None;
        }
        trace!(
            "{}: MAC opportunity - {} bytes, tx window {} PDUs",
            self.ctx.rb_name,
            nof_bytes,
            self.tx.tx_window.len()
        );

        if self.status_due() {
            if let Some(pdu) = self.build_status_pdu(nof_bytes) {
                return Some(pdu);
            }
        }

        // Window stalled with nothing to retransmit: retransmit VT(A) to provoke a status
        if self.tx.window_full() && self.tx.retx_queue.is_empty() {
            let vt_a = self.tx.vt_a;
            self.tx.retransmit_pdu(&self.ctx, vt_a);
        }

        if !self.tx.retx_queue.is_empty() {
            if let Some(pdu) = self.tx.build_retx_pdu(&self.ctx, nof_bytes) {
                return Some(pdu);
            }
        }

        self.tx.build_data_pdu(&self.ctx, nof_bytes)
    }

    fn write_pdu(&mut self, pdu: Bytes) {
        if pdu.is_empty() {
            return;
        }
        self.rx.metrics.rx_pdu(pdu.len());
        if is_data_pdu(&pdu) {
            self.rx.handle_data_pdu(&self.ctx, pdu);
        } else if self.tx.tx_enabled {
            self.tx.handle_status_pdu(&self.ctx, &pdu);
        }
    }

    fn get_buffer_state(&self) -> BufferState {
        let mut state = BufferState::default();
        if self.tx.tx_enabled {
            let mut prio = 0;
            if self.status_due() {
                prio += self.rx.status_len();
            }
            if let Some(retx) = self.tx.retx_queue.front() {
                prio += self.tx.required_buffer_size(retx).unwrap_or(0);
            }
            state = BufferState::new(self.tx.new_tx_bytes() as u32, prio as u32);
        }
        self.ctx
            .report_buffer_state(state.newtx_bytes, state.prio_bytes);
        state
    }

    fn reestablish(&mut self) {
        self.tx.reset();
        self.rx.reset();
        self.tx.tx_enabled = true;
    }

    fn stop(&mut self) {
        self.tx.reset();
        self.rx.reset();
        self.tx.tx_enabled = false;
    }

    fn empty_queue(&mut self) {
        self.tx.sdu_queue.clear();
        self.tx.tx_sdu = None;
    }

    fn tick(&mut self) {
        let mut changed = false;
        if self.tx.poll_retx_timer.step() {
            self.tx.on_poll_retx_expired(&self.ctx);
            changed = true;
        }
        if self.tx.status_prohibit_timer.step() {
            debug!("{}: t-StatusProhibit expired", self.ctx.rb_name);
            changed = true;
        }
        if self.rx.reordering_timer.step() {
            self.rx.on_reordering_expired(&self.ctx);
            changed = true;
        }
        if changed {
            self.get_buffer_state();
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
    use crate::rlc::testing::{payload, test_context, PdcpRecorder, RrcRecorder};
    use std::sync::Arc;

    fn test_config() -> AmLteConfig {
        AmLteConfig {
            t_poll_retx_ms: 5,
            poll_pdu: Some(4),
            poll_byte: Some(25_000),
            max_retx_threshold: 4,
            t_reordering_ms: 5,
            t_status_prohibit_ms: 0,
        }
    }

    fn am_pair(cfg: AmLteConfig) -> (RlcAmLte, RlcAmLte, Arc<PdcpRecorder>, Arc<RrcRecorder>) {
        let (ctx, pdcp, rrc) = test_context();
        let tx = RlcAmLte::new(ctx.clone(), &cfg, 16);
        let rx = RlcAmLte::new(ctx, &cfg, 16);
        (tx, rx, pdcp, rrc)
    }

    fn tick(entity: &mut RlcAmLte, ms: u32) {
        for _ in 0..ms {
            entity.tick();
        }
    }

    /// Queue `count` SDUs of `len` bytes, then read one PDU per SDU
    fn send_sdus(tx: &mut RlcAmLte, count: u32, len: usize) -> Vec<Bytes> {
        for i in 0..count {
            tx.write_sdu(RlcSdu::new(i, payload(i as u8 * 10, len))).unwrap();
        }
        (0..count).map(|_| tx.read_pdu(len + 2).unwrap()).collect()
    }

    #[test]
    fn test_transfer_and_delivery_notification() {
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        for pdu in send_sdus(&mut tx, 5, 10) {
            rx.write_pdu(pdu);
        }
        assert_eq!(pdcp.sdus().len(), 5);
        assert!(rx.has_data());

        let status = rx.read_pdu(100).unwrap();
        let decoded = StatusPdu::read(&status).unwrap();
        assert_eq!(decoded.ack_sn, 5);
        assert!(decoded.nacks.is_empty());

        tx.write_pdu(status);
        assert_eq!(pdcp.delivered(), vec![0, 1, 2, 3, 4]);
        assert!(tx.tx.tx_window.is_empty());
        assert_eq!(tx.tx.vt_a, 5);
        assert!(!tx.tx.poll_retx_timer.is_running());
        assert!(!tx.has_data());
    }

    #[test]
    fn test_concatenation_with_lis() {
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        for i in 0..3u32 {
            tx.write_sdu(RlcSdu::new(i, payload(i as u8 * 10, 10))).unwrap();
        }
        let state = tx.get_buffer_state();
        assert_eq!(state.newtx_bytes, 30 + 3 + 2);
        let pdu = tx.read_pdu(100).unwrap();
        assert_eq!(pdu.len(), 35);
        rx.write_pdu(pdu);
        assert_eq!(
            pdcp.sdus(),
            vec![payload(0, 10), payload(10, 10), payload(20, 10)]
        );
    }

    #[test]
    fn test_loss_is_nacked_and_recovered() {
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        let pdus = send_sdus(&mut tx, 5, 10);
        for sn in [0, 1, 3, 4] {
            rx.write_pdu(pdus[sn].clone());
        }
        assert_eq!(pdcp.sdus().len(), 2);
        assert_eq!(rx.rx.vr_r, 2);
        // Poll of SN 4 waits for t-Reordering
        assert!(!rx.rx.do_status);

        tick(&mut rx, 5);
        assert_eq!(rx.rx.vr_ms, 5);
        let status = rx.read_pdu(100).unwrap();
        let decoded = StatusPdu::read(&status).unwrap();
        assert_eq!(decoded.ack_sn, 5);
        assert_eq!(decoded.nacks, vec![NackInfo::sn(2)]);

        tx.write_pdu(status);
        assert_eq!(tx.tx.vt_a, 2);
        assert_eq!(pdcp.delivered(), vec![0, 1, 3, 4]);

        let retx = tx.read_pdu(12).unwrap();
        rx.write_pdu(retx);
        assert_eq!(
            pdcp.sdus(),
            (0..5u8).map(|i| payload(i * 10, 10)).collect::<Vec<_>>()
        );
        assert_eq!(rx.rx.vr_r, 5);

        tx.write_pdu(rx.read_pdu(100).unwrap());
        assert_eq!(tx.tx.vt_a, 5);
        assert_eq!(pdcp.delivered(), vec![0, 1, 3, 4, 2]);
    }

    #[test]
    fn test_retransmission_is_resegmented() {
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        tx.write_sdu(RlcSdu::new(0, payload(0, 40))).unwrap();
        tx.write_sdu(RlcSdu::new(1, payload(100, 10))).unwrap();
        let lost = tx.read_pdu(100).unwrap();
        assert_eq!(lost.len(), 54);

        // t-PollRetransmit schedules VT(A) again
        tick(&mut tx, 5);
        let segments: Vec<Bytes> = std::iter::from_fn(|| tx.read_pdu(20)).collect();
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.len() <= 20));

        let (last, _) = am_lte::read_data_pdu_header(&segments[3]).unwrap();
        assert!(last.rf && last.lsf);
        assert_eq!(last.so, 42);

        for segment in segments {
            rx.write_pdu(segment);
        }
        assert_eq!(pdcp.sdus(), vec![payload(0, 40), payload(100, 10)]);
    }

    #[test]
    fn test_segment_nack_reported_and_queued() {
        let (mut tx, mut rx, _, _) = am_pair(test_config());
        let header = AmdPduHeader {
            rf: true,
            fi: FramingInfo::NOT_END_ALIGNED,
            sn: 0,
            so: 0,
            ..Default::default()
        };
        let mut segment = BytesMut::new();
        am_lte::write_data_pdu_header(&header, &mut segment);
        segment.extend_from_slice(&payload(0, 14));
        rx.write_pdu(segment.freeze());

        let mut full = BytesMut::new();
        am_lte::write_data_pdu_header(&AmdPduHeader::new(1), &mut full);
        full.extend_from_slice(&payload(50, 5));
        rx.write_pdu(full.freeze());

        tick(&mut rx, 5);
        let status = rx.rx.build_status(100).unwrap();
        assert_eq!(status.ack_sn, 2);
        assert_eq!(status.nacks, vec![NackInfo::segment(0, 14, SO_END_OF_PDU)]);

        // Tx side turns the NACK into a byte range
        tx.write_sdu(RlcSdu::new(0, payload(0, 50))).unwrap();
        tx.write_sdu(RlcSdu::new(1, payload(50, 5))).unwrap();
        tx.read_pdu(52).unwrap();
        tx.read_pdu(7).unwrap();
        let mut buf = BytesMut::new();
        status.write(&mut buf);
        tx.write_pdu(buf.freeze());
        assert_eq!(
            tx.tx.retx_queue.front(),
            Some(&RetxEntry {
                sn: 0,
                is_segment: true,
                so_start: 14,
                so_end: 50,
            })
        );
    }

    #[test]
    fn test_status_truncated_to_grant() {
        let (mut tx, mut rx, _, _) = am_pair(test_config());
        let pdus = send_sdus(&mut tx, 7, 5);
        for sn in [0, 2, 4, 6] {
            rx.write_pdu(pdus[sn].clone());
        }
        tick(&mut rx, 10);
        assert_eq!(rx.rx.vr_ms, 7);

        let status = rx.rx.build_status(100).unwrap();
        assert_eq!(status.ack_sn, 7);
        assert_eq!(
            status.nacks,
            vec![NackInfo::sn(1), NackInfo::sn(3), NackInfo::sn(5)]
        );
        assert!(status.is_valid());

        let status = rx.rx.build_status(4).unwrap();
        assert_eq!(status.ack_sn, 3);
        assert_eq!(status.nacks, vec![NackInfo::sn(1)]);
        assert!(rx.rx.build_status(1).is_none());
    }

    #[test]
    fn test_max_retx_signals_failure() {
        let mut cfg = test_config();
        cfg.max_retx_threshold = 2;
        let (mut tx, _, pdcp, rrc) = am_pair(cfg);
        tx.write_sdu(RlcSdu::new(7, payload(0, 10))).unwrap();
        tx.read_pdu(100).unwrap();

        tick(&mut tx, 5);
        tx.read_pdu(100).unwrap();
        assert_eq!(rrc.max_retx(), 0);

        tick(&mut tx, 5);
        assert_eq!(rrc.max_retx(), 1);
        assert_eq!(pdcp.failed(), vec![7]);
        assert_eq!(tx.metrics().num_lost_pdus, 1);
    }

    #[test]
    fn test_tx_window_is_bounded() {
        let (ctx, _, _) = test_context();
        let mut tx = RlcAmLte::new(ctx, &test_config(), 16);
        for i in 0..600u32 {
            let _ = tx.write_sdu(RlcSdu::new(i, payload(0, 1)));
            tx.read_pdu(3);
            assert!(tx.tx.tx_window.len() <= 512);
        }
        assert!(tx.tx.window_full());
        assert_eq!(tx.tx.vt_s, 512);
        assert_eq!(tx.get_buffer_state().newtx_bytes, 0);
    }

    #[test]
    fn test_reestablish_is_idempotent() {
        let (mut tx, mut rx, _, _) = am_pair(test_config());
        let pdus = send_sdus(&mut tx, 3, 10);
        rx.write_pdu(pdus[2].clone());
        for entity in [&mut tx, &mut rx] {
            entity.reestablish();
            let once = (entity.tx.vt_s, entity.rx.vr_r, entity.rx.vr_h, entity.get_buffer_state());
            entity.reestablish();
            let twice = (entity.tx.vt_s, entity.rx.vr_r, entity.rx.vr_h, entity.get_buffer_state());
            assert_eq!(once, twice);
            assert!(entity.tx.tx_window.is_empty());
            assert!(entity.rx.rx_window.is_empty());
            assert!(!entity.has_data());
        }
    }

    #[test]
    fn test_segment_header_rebuilds_lis() {
        let orig = AmdPduHeader {
            fi: FramingInfo::NOT_START_ALIGNED,
            li: vec![10, 20],
            ..AmdPduHeader::new(5)
        };
        // Data field: [0,10) tail of an SDU, [10,30) full SDU, [30,40) head of the next
        let header = segment_header(&orig, 40, 5, 35);
        assert_eq!(header.li, vec![5, 20]);
        assert_eq!(header.fi, FramingInfo::NOT_START_OR_END_ALIGNED);
        assert!(!header.lsf);

        let header = segment_header(&orig, 40, 10, 40);
        assert_eq!(header.li, vec![20]);
        assert_eq!(header.fi, FramingInfo::START_AND_END_ALIGNED);
        assert!(header.lsf);
    }

    #[test]
    fn test_zero_poll_triggers_fall_back_to_periodic_poll() {
        for (poll_pdu, poll_byte) in [(None, None), (Some(0), Some(0)), (Some(0), None)] {
            let cfg = AmLteConfig {
                poll_pdu,
                poll_byte,
                ..test_config()
            };
            let (mut tx, _, _, _) = am_pair(cfg);
            let polled: Vec<u32> = send_sdus(&mut tx, 12, 10)
                .iter()
                .map(|pdu| am_lte::read_data_pdu_header(pdu).unwrap().0)
                .filter(|header| header.p)
                .map(|header| header.sn)
                .collect();
            // Every 8th PDU, and the one that empties the queue
            assert_eq!(polled, vec![7, 11], "poll_pdu={:?} poll_byte={:?}", poll_pdu, poll_byte);
        }
    }

    #[test]
    fn test_reordering_expiry_nacks_gap_instead_of_skipping() {
        // t-Reordering expiry moves VR(MS) over the gap and reports it; VR(R) waits for the retransmission
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        let pdus = send_sdus(&mut tx, 4, 10);
        for sn in [0, 1, 3] {
            rx.write_pdu(pdus[sn].clone());
        }
        tick(&mut rx, 20);
        assert_eq!(rx.rx.vr_r, 2);
        assert_eq!(rx.rx.vr_ms, 4);
        assert_eq!(rx.metrics().num_lost_pdus, 0);
        assert_eq!(pdcp.sdus().len(), 2);
        assert!(!rx.rx.reordering_timer.is_running());

        let status = StatusPdu::read(&rx.read_pdu(100).unwrap()).unwrap();
        assert_eq!(status.ack_sn, 4);
        assert_eq!(status.nacks, vec![NackInfo::sn(2)]);

        rx.write_pdu(pdus[2].clone());
        assert_eq!(rx.rx.vr_r, 4);
        assert_eq!(
            pdcp.sdus(),
            (0..4u8).map(|i| payload(i * 10, 10)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_reassembly_overflow_drops_sdu() {
        let (mut tx, mut rx, pdcp, _) = am_pair(test_config());
        tx.write_sdu(RlcSdu::new(0, payload(0, MAX_SDU_SIZE_LTE + 53))).unwrap();
        let pdus: Vec<Bytes> = std::iter::from_fn(|| tx.read_pdu(1000)).collect();
        assert_eq!(pdus.len(), 3);
        for pdu in pdus {
            rx.write_pdu(pdu);
        }
        assert!(pdcp.sdus().is_empty());
        assert_eq!(rx.metrics().num_lost_sdus, 1);
        assert!(rx.rx.rx_sdu.is_empty());

        tx.write_sdu(RlcSdu::new(1, payload(7, 10))).unwrap();
        rx.write_pdu(tx.read_pdu(100).unwrap());
        assert_eq!(pdcp.sdus(), vec![payload(7, 10)]);
        assert_eq!(rx.rx.vr_r, 4);
    }
}
