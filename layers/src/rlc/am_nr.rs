//! NR Acknowledged Mode entity (TS 38.322 section 5.2.3)
//!
//! One SDU per SN, segmented by byte offset. Retransmissions are cut to the
//! grant on the fly, the receiver delivers every SDU as soon as all of its
//! bytes arrived and keeps a completed marker until RX_Next moves past it.

use super::config::AmNrConfig;
use super::entity::RlcEngine;
use super::metrics::RlcBearerMetrics;
use super::pdu::am_nr::{
    self, AmNrNack, AmNrPduHeader, AmNrSnSize, AmNrStatusPdu, SO_END_OF_SDU, STATUS_HEADER_LEN,
};
use super::pdu::is_data_pdu;
use super::sdu_queue::{RlcSdu, SduQueue};
use super::timer::Timer;
use super::window::{RetxEntry, RetxQueue, SnSpace, SnWindow};
use super::{RlcContext, MAX_SDU_SIZE_NR};
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::types::{SegmentInfo, INVALID_PDCP_SN};
use common::utils::bytes_to_hex;
use interfaces::BufferState;
use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

pub struct RlcAmNr {
    ctx: RlcContext,
    tx: AmNrTx,
    rx: AmNrRx,
}

impl RlcAmNr {
    pub fn new(ctx: RlcContext, cfg: &AmNrConfig, tx_queue_length: usize) -> Result<Self, LayerError> {
        let tx_sn_size = AmNrSnSize::from_bits(cfg.tx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!(
                "unsupported AM NR SN length {}",
                cfg.tx_sn_field_length
            ))
        })?;
        let rx_sn_size = AmNrSnSize::from_bits(cfg.rx_sn_field_length).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!(
                "unsupported AM NR SN length {}",
                cfg.rx_sn_field_length
            ))
        })?;
        info!(
            "{}: configured in AM NR: sn_field_length={}, t_poll_retx={} ms, poll_pdu={:?}, poll_byte={:?}, max_retx_thresh={}, t_reassembly={} ms, t_status_prohibit={} ms",
            ctx.rb_name,
            cfg.tx_sn_field_length,
            cfg.t_poll_retx_ms,
            cfg.poll_pdu,
            cfg.poll_byte,
            cfg.max_retx_threshold,
            cfg.t_reassembly_ms,
            cfg.t_status_prohibit_ms
        );
        Ok(Self {
            tx: AmNrTx::new(cfg, tx_sn_size, tx_queue_length),
            rx: AmNrRx::new(cfg, rx_sn_size),
            ctx,
        })
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
            "{}: tx status PDU ACK_SN={}, N_nack={}, nacked SNs={} ({} B)",
            self.ctx.rb_name,
            status.ack_sn,
            status.nacks.len(),
            status.nof_nacked_sns(),
            pdu.len()
        );
        Some(pdu.freeze())
    }
}

struct AmNrTxPdu {
    pdcp_sn: u32,
    sdu: Bytes,
    /// Bytes of the SDU handed to lower layers so far
    sent_len: u32,
    retx_count: u32,
}

struct AmNrTx {
    cfg: AmNrConfig,
    sn_size: AmNrSnSize,
    space: SnSpace,
    sdu_queue: SduQueue,
    tx_window: SnWindow<AmNrTxPdu>,
    retx_queue: RetxQueue,
    /// SN of the SDU whose segmentation is in progress
    current_sn: Option<u32>,
    tx_next_ack: u32,
    tx_next: u32,
    poll_sn: u32,
    pdu_without_poll: u32,
    byte_without_poll: u32,
    poll_retx_timer: Timer,
    status_prohibit_timer: Timer,
    tx_enabled: bool,
    metrics: RlcBearerMetrics,
}

impl AmNrTx {
    fn new(cfg: &AmNrConfig, sn_size: AmNrSnSize, tx_queue_length: usize) -> Self {
        let space = SnSpace::new(sn_size.bits());
        Self {
            cfg: cfg.clone(),
            sn_size,
            space,
            sdu_queue: SduQueue::new(tx_queue_length),
            tx_window: SnWindow::new(space.window_size() as usize),
            retx_queue: RetxQueue::new(space.window_size() as usize),
            current_sn: None,
            tx_next_ack: 0,
            tx_next: 0,
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
        self.tx_window.clear();
        self.retx_queue.clear();
        self.current_sn = None;
        self.tx_next_ack = 0;
        self.tx_next = 0;
        self.poll_sn = 0;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_retx_timer.stop();
        self.status_prohibit_timer.stop();
    }

    fn window_full(&self) -> bool {
        self.space.offset(self.tx_next, self.tx_next_ack) >= self.space.window_size()
    }

    fn has_data(&self) -> bool {
        !self.retx_queue.is_empty() || self.current_sn.is_some() || !self.sdu_queue.is_empty()
    }

    /// Highest SN handed to lower layers
    fn highest_submitted_sn(&self) -> u32 {
        self.current_sn
            .unwrap_or_else(|| self.space.sub(self.tx_next, 1))
    }

    fn header_len(&self, so: u32) -> usize {
        if so == 0 {
            self.sn_size.min_header_len()
        } else {
            self.sn_size.max_header_len()
        }
    }

    fn new_tx_bytes(&self) -> usize {
        let mut nof_bytes = 0;
        if let Some(pdu) = self.current_sn.and_then(|sn| self.tx_window.get(sn)) {
            nof_bytes += pdu.sdu.len() - pdu.sent_len as usize + self.sn_size.max_header_len();
        }
        if !self.window_full() {
            nof_bytes += self.sdu_queue.size_bytes()
                + self.sdu_queue.size() * self.sn_size.min_header_len();
        }
        nof_bytes
    }

    fn required_buffer_size(&self, retx: &RetxEntry) -> usize {
        self.header_len(retx.so_start) + (retx.so_end - retx.so_start) as usize
    }

    /// Set the poll bit if a trigger of 5.3.3.2 fired. Only new data counts towards
    /// pollPDU and pollByte.
    fn update_poll(&mut self, rb_name: &str, header: &mut AmNrPduHeader, nof_data_bytes: usize, new_data: bool) {
        if new_data {
            self.pdu_without_poll += 1;
            self.byte_without_poll += nof_data_bytes as u32;
        }
        let poll = matches!(self.cfg.poll_pdu, Some(n) if n > 0 && self.pdu_without_poll >= n)
            || matches!(self.cfg.poll_byte, Some(n) if n > 0 && self.byte_without_poll >= n)
            || (self.sdu_queue.is_empty() && self.current_sn.is_none() && self.retx_queue.is_empty())
            || self.window_full()
            || self.poll_retx_timer.is_expired();
        if poll {
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.poll_sn = self.highest_submitted_sn();
            header.p = true;
            self.poll_retx_timer.run();
            trace!("{}: setting poll bit, POLL_SN={}", rb_name, self.poll_sn);
        }
    }

    fn write_pdu(header: &AmNrPduHeader, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(am_nr::packed_length(header) + data.len());
        am_nr::write_data_pdu_header(header, &mut buf);
        buf.extend_from_slice(data);
        buf.freeze()
    }

    fn build_new_pdu(&mut self, ctx: &RlcContext, nof_bytes: usize) -> Option<Bytes> {
        if let Some(sn) = self.current_sn {
            return self.build_continuation_segment(ctx, sn, nof_bytes);
        }
        if self.sdu_queue.is_empty() {
            return None;
        }
        if self.window_full() {
            debug!(
                "{}: cannot build data PDU - Tx window full, TX_Next_Ack={}, TX_Next={}",
                ctx.rb_name, self.tx_next_ack, self.tx_next
            );
            return None;
        }
        let min_hdr = self.sn_size.min_header_len();
        if nof_bytes <= min_hdr {
            debug!(
                "{}: cannot build data PDU - {} bytes available",
                ctx.rb_name, nof_bytes
            );
            return None;
        }
        let sdu = self.sdu_queue.read()?;
        let sn = self.tx_next;
        let (si, data_len) = if sdu.len() + min_hdr <= nof_bytes {
            (SegmentInfo::FullSdu, sdu.len())
        } else {
            (SegmentInfo::FirstSegment, nof_bytes - min_hdr)
        };
        let data = sdu.payload.slice(..data_len);
        self.tx_window.insert(
            sn,
            AmNrTxPdu {
                pdcp_sn: sdu.pdcp_sn,
                sdu: sdu.payload,
                sent_len: data_len as u32,
                retx_count: 0,
            },
        );
        if si == SegmentInfo::FullSdu {
            self.tx_next = self.space.add(sn, 1);
        } else {
            self.current_sn = Some(sn);
        }

        let mut header = AmNrPduHeader::new(self.sn_size, sn, si, 0);
        self.update_poll(&ctx.rb_name, &mut header, data_len, true);
        let pdu = Self::write_pdu(&header, &data);
        self.metrics.tx_pdu(pdu.len());
        debug!(
            "{}: tx PDU SN={} {} ({} B, p={})",
            ctx.rb_name,
            sn,
            si.short_name(),
            pdu.len(),
            header.p
        );
        Some(pdu)
    }

    fn build_continuation_segment(&mut self, ctx: &RlcContext, sn: u32, nof_bytes: usize) -> Option<Bytes> {
        let max_hdr = self.sn_size.max_header_len();
        if nof_bytes <= max_hdr {
            debug!(
                "{}: cannot continue SDU segmentation - {} bytes available",
                ctx.rb_name, nof_bytes
            );
            return None;
        }
        let Some(pdu) = self.tx_window.get_mut(sn) else {
            error!(
                "{}: SDU being segmented (SN={}) not in Tx window, aborting segmentation",
                ctx.rb_name, sn
            );
            self.current_sn = None;
            self.tx_next = self.space.add(sn, 1);
            return None;
        };
        let so = pdu.sent_len;
        let remaining = pdu.sdu.len() - so as usize;
        let (si, data_len) = if remaining + max_hdr <= nof_bytes {
            (SegmentInfo::LastSegment, remaining)
        } else {
            (SegmentInfo::NeitherFirstNorLast, nof_bytes - max_hdr)
        };
        pdu.sent_len += data_len as u32;
        let data = pdu.sdu.slice(so as usize..so as usize + data_len);
        if si == SegmentInfo::LastSegment {
            self.current_sn = None;
            self.tx_next = self.space.add(sn, 1);
        }

        let mut header = AmNrPduHeader::new(self.sn_size, sn, si, so);
        self.update_poll(&ctx.rb_name, &mut header, data_len, true);
        let pdu = Self::write_pdu(&header, &data);
        self.metrics.tx_pdu(pdu.len());
        debug!(
            "{}: tx PDU SN={} {} SO={} ({} B, p={})",
            ctx.rb_name,
            sn,
            si.short_name(),
            so,
            pdu.len(),
            header.p
        );
        Some(pdu)
    }

    fn build_retx_pdu(&mut self, ctx: &RlcContext, nof_bytes: usize) -> Option<Bytes> {
        while let Some(front) = self.retx_queue.front() {
            if self.tx_window.has_sn(front.sn) {
                break;
            }
            warn!("{}: SN={} not in Tx window, ignoring retx", ctx.rb_name, front.sn);
            self.retx_queue.pop();
        }
        let retx = *self.retx_queue.front()?;
        let hdr_len = self.header_len(retx.so_start);
        if nof_bytes <= hdr_len {
            debug!(
                "{}: cannot build retx PDU - {} bytes available",
                ctx.rb_name, nof_bytes
            );
            return None;
        }
        let pdu = self.tx_window.get(retx.sn)?;
        let sdu_len = pdu.sdu.len() as u32;
        let end = retx.so_end.min(retx.so_start + (nof_bytes - hdr_len) as u32);
        let si = match (retx.so_start == 0, end == sdu_len) {
            (true, true) => SegmentInfo::FullSdu,
            (true, false) => SegmentInfo::FirstSegment,
            (false, true) => SegmentInfo::LastSegment,
            (false, false) => SegmentInfo::NeitherFirstNorLast,
        };
        let data = pdu.sdu.slice(retx.so_start as usize..end as usize);
        let attempt = pdu.retx_count;

        if end >= retx.so_end {
            self.retx_queue.pop();
        } else if let Some(front) = self.retx_queue.front_mut() {
            front.is_segment = true;
            front.so_start = end;
        }

        let mut header = AmNrPduHeader::new(self.sn_size, retx.sn, si, retx.so_start);
        self.update_poll(&ctx.rb_name, &mut header, data.len(), false);
        let pdu = Self::write_pdu(&header, &data);
        self.metrics.tx_pdu(pdu.len());
        info!(
            "{}: retx PDU SN={} {} [so={}:{}] ({} B) (attempt {}/{})",
            ctx.rb_name,
            retx.sn,
            si.short_name(),
            retx.so_start,
            end,
            pdu.len(),
            attempt,
            self.cfg.max_retx_threshold
        );
        Some(pdu)
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
            if pdu.pdcp_sn != INVALID_PDCP_SN {
                ctx.pdcp.notify_failure(ctx.lcid, &[pdu.pdcp_sn]);
            }
            self.metrics.num_lost_pdus += 1;
        }
    }

    /// Queue the union of the NACKed byte ranges of `sn`, limited to bytes already sent
    fn schedule_retx(&mut self, ctx: &RlcContext, sn: u32, ranges: &[Option<(u32, u32)>]) {
        let Some(pdu) = self.tx_window.get_mut(sn) else {
            debug!("{}: NACKed SN={} no longer in Tx window", ctx.rb_name, sn);
            return;
        };
        let sent = pdu.sent_len;
        let mut union: Option<(u32, u32)> = None;
        for range in ranges {
            let (so_start, so_end) = match *range {
                Some((so_start, so_end)) => {
                    let so_end = if so_end == SO_END_OF_SDU {
                        sent
                    } else {
                        (so_end + 1).min(sent)
                    };
                    (so_start.min(sent), so_end)
                }
                None => (0, sent),
            };
            if so_start >= so_end {
                warn!(
                    "{}: ignoring NACK for SN={} with empty range {}:{}",
                    ctx.rb_name, sn, so_start, so_end
                );
                continue;
            }
            union = Some(match union {
                Some((s, e)) => (s.min(so_start), e.max(so_end)),
                None => (so_start, so_end),
            });
        }
        let Some((so_start, so_end)) = union else {
            return;
        };
        let entry = RetxEntry {
            sn,
            is_segment: so_start != 0 || so_end as usize != pdu.sdu.len(),
            so_start,
            so_end,
        };
        pdu.retx_count += 1;
        self.check_max_retx(ctx, sn);
        debug!(
            "{}: NACK SN={} [{}:{}] queued for retx",
            ctx.rb_name, sn, so_start, so_end
        );
        if !self.retx_queue.push(entry) {
            warn!("{}: retx queue full, SN={} not scheduled", ctx.rb_name, sn);
        }
    }

    fn handle_status_pdu(&mut self, ctx: &RlcContext, pdu: &[u8]) {
        let status = match AmNrStatusPdu::read(pdu, self.sn_size) {
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

        let base = self.tx_next_ack;
        let upper = self.space.add(self.highest_submitted_sn(), 1);
        if self.space.offset(status.ack_sn, base) > self.space.offset(upper, base) {
            warn!(
                "{}: ACK_SN={} beyond highest submitted SN (TX_Next_Ack={}, TX_Next={}), ignoring status",
                ctx.rb_name, status.ack_sn, base, self.tx_next
            );
            return;
        }

        // Missing byte ranges per SN, keyed by offset from TX_Next_Ack
        let mut nacked: BTreeMap<u32, Vec<Option<(u32, u32)>>> = BTreeMap::new();
        for nack in &status.nacks {
            let nof_sns = nack.nof_sns();
            for i in 0..nof_sns {
                let sn = self.space.add(nack.nack_sn, i);
                if !self.space.lt(sn, status.ack_sn, base) {
                    warn!(
                        "{}: NACK_SN={} outside [{}, {}), ignoring it",
                        ctx.rb_name, sn, base, status.ack_sn
                    );
                    continue;
                }
                let so = nack.so.map(|(so_start, so_end)| {
                    let so_start = if i == 0 { so_start } else { 0 };
                    let so_end = if i + 1 == nof_sns { so_end } else { SO_END_OF_SDU };
                    (so_start, so_end)
                });
                nacked.entry(self.space.offset(sn, base)).or_default().push(so);
            }
        }

        if self.space.lt(self.poll_sn, status.ack_sn, base) && self.poll_retx_timer.is_running() {
            debug!("{}: POLL_SN={} reported, stopping t-PollRetransmit", ctx.rb_name, self.poll_sn);
            self.poll_retx_timer.stop();
        }

        if !nacked.is_empty() {
            self.retx_queue.clear();
        }

        let mut delivered = Vec::new();
        let mut sn = base;
        while self.space.lt(sn, status.ack_sn, base) {
            match nacked.get(&self.space.offset(sn, base)) {
                Some(ranges) => self.schedule_retx(ctx, sn, ranges),
                None if self.current_sn == Some(sn) => {
                    warn!("{}: ACK for SN={} whose segmentation is unfinished", ctx.rb_name, sn);
                }
                None => {
                    if let Some(pdu) = self.tx_window.remove(sn) {
                        trace!("{}: SN={} acknowledged", ctx.rb_name, sn);
                        if pdu.pdcp_sn != INVALID_PDCP_SN {
                            delivered.push(pdu.pdcp_sn);
                        }
                    }
                }
            }
            sn = self.space.add(sn, 1);
        }

        while self.tx_next_ack != upper && !self.tx_window.has_sn(self.tx_next_ack) {
            self.tx_next_ack = self.space.add(self.tx_next_ack, 1);
        }
        debug!(
            "{}: TX_Next_Ack={}, TX_Next={}, POLL_SN={}",
            ctx.rb_name, self.tx_next_ack, self.tx_next, self.poll_sn
        );

        if !delivered.is_empty() {
            ctx.pdcp.notify_delivery(ctx.lcid, &delivered);
        }
    }

    /// t-PollRetransmit expired (5.3.3.4)
    fn on_poll_retx_expired(&mut self, ctx: &RlcContext) {
        debug!(
            "{}: t-PollRetransmit expired after {} ms",
            ctx.rb_name,
            self.poll_retx_timer.duration()
        );
        let queues_empty =
            self.retx_queue.is_empty() && self.sdu_queue.is_empty() && self.current_sn.is_none();
        if !(queues_empty || self.window_full()) {
            return;
        }
        let sn = self.tx_next_ack;
        let Some(pdu) = self.tx_window.get(sn) else {
            return;
        };
        let so_end = pdu.sent_len;
        if self.retx_queue.has_sn(sn) {
            return;
        }
        self.schedule_retx(ctx, sn, &[Some((0, so_end.saturating_sub(1)))]);
    }
}

/// Reception state of one SN
#[derive(Debug, Default)]
struct AmNrRxSdu {
    /// Received byte segments keyed by SO
    segments: BTreeMap<u32, Bytes>,
    /// Known once the last segment arrived
    total_len: Option<u32>,
    /// All bytes received and the SDU handed to PDCP
    delivered: bool,
}

impl AmNrRxSdu {
    /// Whether bytes `[start, end)` are already present
    fn covers(&self, start: u32, end: u32) -> bool {
        let mut cursor = start;
        for (&so, data) in &self.segments {
            if so > cursor {
                break;
            }
            cursor = cursor.max(so + data.len() as u32);
            if cursor >= end {
                return true;
            }
        }
        false
    }

    fn insert(&mut self, so: u32, data: Bytes, is_last: bool) {
        if is_last {
            self.total_len = Some(so + data.len() as u32);
        }
        match self.segments.get(&so) {
            Some(existing) if existing.len() >= data.len() => {}
            _ => {
                self.segments.insert(so, data);
            }
        }
    }

    /// End of the contiguous byte run starting at SO 0
    fn contiguous_end(&self) -> u32 {
        let mut cursor = 0;
        for (&so, data) in &self.segments {
            if so > cursor {
                break;
            }
            cursor = cursor.max(so + data.len() as u32);
        }
        cursor
    }

    fn is_complete(&self) -> bool {
        matches!(self.total_len, Some(total) if self.contiguous_end() >= total)
    }

    /// Some byte before the last received one is missing
    fn has_gap(&self) -> bool {
        let last_byte = self
            .segments
            .iter()
            .map(|(&so, data)| so + data.len() as u32)
            .max()
            .unwrap_or(0);
        self.contiguous_end() < last_byte
    }

    /// Missing ranges as inclusive `(so_start, so_end)`, the tail open-ended if the
    /// last segment never arrived
    fn missing_ranges(&self) -> Vec<(u32, u32)> {
        let mut ranges = Vec::new();
        let mut cursor = 0;
        for (&so, data) in &self.segments {
            if so > cursor {
                ranges.push((cursor, so - 1));
            }
            cursor = cursor.max(so + data.len() as u32);
        }
        match self.total_len {
            Some(total) if cursor >= total => {}
            _ => ranges.push((cursor, SO_END_OF_SDU)),
        }
        ranges
    }

    /// Join all segments into the SDU and keep only the completion marker
    fn take_sdu(&mut self) -> Bytes {
        let total = self.total_len.unwrap_or(0) as usize;
        let mut sdu = BytesMut::with_capacity(total);
        for (&so, data) in &self.segments {
            let so = so as usize;
            let end = so + data.len();
            if end > sdu.len() {
                sdu.extend_from_slice(&data[sdu.len() - so..]);
            }
        }
        sdu.truncate(total);
        self.segments.clear();
        self.delivered = true;
        sdu.freeze()
    }
}

struct AmNrRx {
    sn_size: AmNrSnSize,
    space: SnSpace,
    max_nacks: u32,
    rx_window: SnWindow<AmNrRxSdu>,
    rx_next: u32,
    rx_next_status_trigger: u32,
    rx_highest_status: u32,
    rx_next_highest: u32,
    reassembly_timer: Timer,
    /// SN of a poll whose status is delayed (5.3.4)
    pending_poll: Option<u32>,
    do_status: bool,
    metrics: RlcBearerMetrics,
}

impl AmNrRx {
    fn new(cfg: &AmNrConfig, sn_size: AmNrSnSize) -> Self {
        let space = SnSpace::new(sn_size.bits());
        Self {
            sn_size,
            space,
            max_nacks: cfg.max_nacks_per_status,
            rx_window: SnWindow::new(space.window_size() as usize),
            rx_next: 0,
            rx_next_status_trigger: 0,
            rx_highest_status: 0,
            rx_next_highest: 0,
            reassembly_timer: Timer::new(cfg.t_reassembly_ms),
            pending_poll: None,
            do_status: false,
            metrics: RlcBearerMetrics::default(),
        }
    }

    fn reset(&mut self) {
        self.rx_window.clear();
        self.rx_next = 0;
        self.rx_next_status_trigger = 0;
        self.rx_highest_status = 0;
        self.rx_next_highest = 0;
        self.reassembly_timer.stop();
        self.pending_poll = None;
        self.do_status = false;
    }

    fn inside_rx_window(&self, sn: u32) -> bool {
        self.space.inside(sn, self.rx_next)
    }

    fn sn_complete(&self, sn: u32) -> bool {
        self.rx_window.get(sn).map(|e| e.delivered).unwrap_or(false)
    }

    fn missing_segment_before_last(&self, sn: u32) -> bool {
        self.rx_window
            .get(sn)
            .map(|e| !e.delivered && e.has_gap())
            .unwrap_or(false)
    }

    fn handle_data_pdu(&mut self, ctx: &RlcContext, pdu: Bytes) {
        let (header, header_len) = match am_nr::read_data_pdu_header(&pdu, self.sn_size) {
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
        let sn = header.sn;
        debug!(
            "{}: rx data PDU SN={} {} SO={} ({} B, p={})",
            ctx.rb_name,
            sn,
            header.si.short_name(),
            header.so,
            payload.len(),
            header.p
        );

        if !self.inside_rx_window(sn) {
            debug!(
                "{}: SN={} outside rx window [{}, {}), discarding",
                ctx.rb_name,
                sn,
                self.rx_next,
                self.space.add(self.rx_next, self.space.window_size())
            );
            if header.p {
                self.do_status = true;
            }
            return;
        }
        let so = header.so;
        let end = so + payload.len() as u32;

        if !self.rx_window.has_sn(sn) {
            self.rx_window.insert(sn, AmNrRxSdu::default());
        }
        let Some(entry) = self.rx_window.get_mut(sn) else {
            return;
        };
        if entry.delivered || entry.covers(so, end) {
            debug!("{}: duplicate bytes {}:{} of SN={}, discarding", ctx.rb_name, so, end, sn);
            if header.p {
                self.do_status = true;
            }
            return;
        }
        let overflow = end as usize > MAX_SDU_SIZE_NR;
        let sdu = if overflow {
            warn!(
                "{}: segment SN={} ends at byte {}, beyond the maximum SDU size, dropping the SDU",
                ctx.rb_name, sn, end
            );
            // Done with the SN, nothing goes up
            entry.segments.clear();
            entry.delivered = true;
            None
        } else {
            let is_last = matches!(header.si, SegmentInfo::FullSdu | SegmentInfo::LastSegment);
            entry.insert(so, payload, is_last);
            if entry.is_complete() {
                Some(entry.take_sdu())
            } else {
                None
            }
        };
        if overflow {
            self.metrics.num_lost_sdus += 1;
        }

        if header.p {
            debug!("{}: status requested through polling bit", ctx.rb_name);
            self.pending_poll = Some(sn);
        }

        if !self.space.lt(sn, self.rx_next_highest, self.rx_next) {
            self.rx_next_highest = self.space.add(sn, 1);
        }

        let completed = overflow || sdu.is_some();
        if let Some(sdu) = sdu {
            trace!("{}: rx SDU SN={} ({} B) {}", ctx.rb_name, sn, sdu.len(), bytes_to_hex(&sdu));
            self.metrics.rx_sdu(sdu.len());
            ctx.pdcp.write_pdu(ctx.lcid, sdu);
        }
        if completed {
            if sn == self.rx_highest_status {
                while self.rx_highest_status != self.rx_next_highest
                    && self.sn_complete(self.rx_highest_status)
                {
                    self.rx_highest_status = self.space.add(self.rx_highest_status, 1);
                }
            }
            if sn == self.rx_next {
                while self.sn_complete(self.rx_next) {
                    self.rx_window.remove(self.rx_next);
                    self.rx_next = self.space.add(self.rx_next, 1);
                }
            }
        }

        self.check_pending_poll();
        self.update_reassembly_timer(ctx);
        trace!(
            "{}: RX_Next={}, RX_Highest_Status={}, RX_Next_Highest={}",
            ctx.rb_name,
            self.rx_next,
            self.rx_highest_status,
            self.rx_next_highest
        );
    }

    fn check_pending_poll(&mut self) {
        if let Some(poll_sn) = self.pending_poll {
            if !self.inside_rx_window(poll_sn)
                || self.space.lt(poll_sn, self.rx_highest_status, self.rx_next)
            {
                self.do_status = true;
                self.pending_poll = None;
            }
        }
    }

    /// Stop/start t-Reassembly after a placement (5.2.3.2.3)
    fn update_reassembly_timer(&mut self, ctx: &RlcContext) {
        let rx_next_plus_one = self.space.add(self.rx_next, 1);
        if self.reassembly_timer.is_running() {
            let trigger = self.rx_next_status_trigger;
            let window_end = self.space.add(self.rx_next, self.space.window_size());
            if trigger == self.rx_next
                || (trigger == rx_next_plus_one && !self.missing_segment_before_last(self.rx_next))
                || (!self.inside_rx_window(trigger) && trigger != window_end)
            {
                debug!("{}: stopping t-Reassembly", ctx.rb_name);
                self.reassembly_timer.stop();
            }
        }
        if !self.reassembly_timer.is_running() {
            let start = self.space.lt(rx_next_plus_one, self.rx_next_highest, self.rx_next)
                || (self.rx_next_highest == rx_next_plus_one
                    && self.missing_segment_before_last(self.rx_next));
            if start {
                self.rx_next_status_trigger = self.rx_next_highest;
                self.reassembly_timer.run();
                debug!(
                    "{}: starting t-Reassembly, RX_Next_Status_Trigger={}",
                    ctx.rb_name, self.rx_next_status_trigger
                );
            }
        }
    }

    /// t-Reassembly expired (5.2.3.2.4)
    fn on_reassembly_expired(&mut self, ctx: &RlcContext) {
        self.rx_highest_status = self.rx_next_status_trigger;
        while self.rx_highest_status != self.rx_next_highest && self.sn_complete(self.rx_highest_status) {
            self.rx_highest_status = self.space.add(self.rx_highest_status, 1);
        }
        debug!(
            "{}: t-Reassembly expired, RX_Highest_Status={}",
            ctx.rb_name, self.rx_highest_status
        );

        let highest_plus_one = self.space.add(self.rx_highest_status, 1);
        let restart = self.space.lt(highest_plus_one, self.rx_next_highest, self.rx_next)
            || (self.rx_next_highest == highest_plus_one
                && self.missing_segment_before_last(self.rx_highest_status));
        if restart {
            self.rx_next_status_trigger = self.rx_next_highest;
            self.reassembly_timer.run();
        }
        self.do_status = true;
        self.pending_poll = None;
    }

    /// Status of `[RX_Next, RX_Highest_Status)` fitting in `max_len` bytes
    fn build_status(&self, max_len: usize) -> Option<AmNrStatusPdu> {
        if max_len < STATUS_HEADER_LEN {
            return None;
        }
        let mut status = AmNrStatusPdu::new(self.sn_size, self.rx_highest_status);
        let mut sn = self.rx_next;
        while sn != self.rx_highest_status {
            if !self.sn_complete(sn) {
                if status.nof_nacked_sns() >= self.max_nacks {
                    status.ack_sn = sn;
                    break;
                }
                match self.rx_window.get(sn) {
                    Some(entry) if !entry.segments.is_empty() => {
                        for (so_start, so_end) in entry.missing_ranges() {
                            status.push_nack(AmNrNack::segment(sn, so_start, so_end));
                        }
                    }
                    _ => status.push_nack(AmNrNack::sn(sn)),
                }
            }
            sn = self.space.add(sn, 1);
        }
        if !status.trim(max_len) {
            return None;
        }
        // NACKs left over from an SN whose last NACK was trimmed
        while status.nacks.last().map(|n| n.nack_sn) == Some(status.ack_sn) {
            status.nacks.pop();
        }
        Some(status)
    }

    fn status_len(&self) -> usize {
        self.build_status(usize::MAX)
            .map(|status| status.packed_length())
            .unwrap_or(0)
    }
}

impl RlcEngine for RlcAmNr {
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
        if !self.tx.retx_queue.is_empty() {
            if let Some(pdu) = self.tx.build_retx_pdu(&self.ctx, nof_bytes) {
                return Some(pdu);
            }
        }
        self.tx.build_new_pdu(&self.ctx, nof_bytes)
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
                prio += self.tx.required_buffer_size(retx);
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
        if self.rx.reassembly_timer.step() {
            self.rx.on_reassembly_expired(&self.ctx);
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
