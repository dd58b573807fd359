//! Segment Ledger
//!
//! Tracks which bytes of which PDCP SDU travel in which RLC PDU so that PDCP can be
//! told exactly when an SDU has been fully acknowledged, or which SDUs were lost when
//! a PDU exhausts its retransmissions.
//!
//! Every segment sits in two lists at once: the list of its RLC PDU (walked when a
//! status report acknowledges the PDU) and the list of its PDCP SDU (emptied as the
//! PDUs carrying it are acknowledged). Both lists are threaded through one index
//! arena; a slot returns to the free list once it is detached from both sides.

use common::types::{INVALID_PDCP_SN, INVALID_RLC_SN};
use tracing::warn;

/// Number of segment slots in the arena
pub const SEGMENT_POOL_SIZE: usize = 16384;

/// Number of PDCP SDUs that can be tracked at once
pub const PDCP_INFO_BUFFER_SIZE: usize = 4096;

/// PDCP SN reserved for PDCP status reports, tracked outside the ring
pub const STATUS_REPORT_SN: u32 = u32::MAX - 1;

type SegmentId = u32;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<SegmentId>,
    next: Option<SegmentId>,
}

#[derive(Debug, Clone)]
struct Segment {
    rlc_sn: u32,
    pdcp_sn: u32,
    pdu_link: Link,
    sdu_link: Link,
    next_free: Option<SegmentId>,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            rlc_sn: INVALID_RLC_SN,
            pdcp_sn: INVALID_PDCP_SN,
            pdu_link: Link::default(),
            sdu_link: Link::default(),
            next_free: None,
        }
    }
}

/// Head of an intrusive list of segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentList {
    head: Option<SegmentId>,
    tail: Option<SegmentId>,
    len: usize,
}

impl SegmentList {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    Pdu,
    Sdu,
}

/// Arena of segment records with a free list
#[derive(Debug)]
struct SegmentPool {
    segments: Vec<Segment>,
    free_head: Option<SegmentId>,
    nof_free: usize,
}

impl SegmentPool {
    fn new(capacity: usize) -> Self {
        let mut segments = vec![Segment::default(); capacity];
        for (i, segment) in segments.iter_mut().enumerate() {
            segment.next_free = if i + 1 < capacity {
                Some((i + 1) as SegmentId)
            } else {
                None
            };
        }
        Self {
            segments,
            free_head: if capacity > 0 { Some(0) } else { None },
            nof_free: capacity,
        }
    }

    fn acquire(&mut self) -> Option<SegmentId> {
        let id = self.free_head?;
        let segment = &mut self.segments[id as usize];
        self.free_head = segment.next_free.take();
        self.nof_free -= 1;
        Some(id)
    }

    fn release(&mut self, id: SegmentId) {
        let segment = &mut self.segments[id as usize];
        *segment = Segment::default();
        segment.next_free = self.free_head;
        self.free_head = Some(id);
        self.nof_free += 1;
    }

    fn link_mut(&mut self, kind: ListKind, id: SegmentId) -> &mut Link {
        let segment = &mut self.segments[id as usize];
        match kind {
            ListKind::Pdu => &mut segment.pdu_link,
            ListKind::Sdu => &mut segment.sdu_link,
        }
    }

    fn link(&self, kind: ListKind, id: SegmentId) -> Link {
        let segment = &self.segments[id as usize];
        match kind {
            ListKind::Pdu => segment.pdu_link,
            ListKind::Sdu => segment.sdu_link,
        }
    }

    fn push_back(&mut self, kind: ListKind, list: &mut SegmentList, id: SegmentId) {
        *self.link_mut(kind, id) = Link {
            prev: list.tail,
            next: None,
        };
        match list.tail {
            Some(tail) => self.link_mut(kind, tail).next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);
        list.len += 1;
    }

    fn unlink(&mut self, kind: ListKind, list: &mut SegmentList, id: SegmentId) {
        let Link { prev, next } = self.link(kind, id);
        match prev {
            Some(prev) => self.link_mut(kind, prev).next = next,
            None => list.head = next,
        }
        match next {
            Some(next) => self.link_mut(kind, next).prev = prev,
            None => list.tail = prev,
        }
        *self.link_mut(kind, id) = Link::default();
        list.len -= 1;
    }

    fn ids(&self, kind: ListKind, list: &SegmentList) -> Vec<SegmentId> {
        let mut ids = Vec::with_capacity(list.len);
        let mut cursor = list.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.link(kind, id).next;
        }
        ids
    }
}

/// Delivery state of one PDCP SDU
#[derive(Debug, Clone)]
struct PdcpSduInfo {
    sn: u32,
    fully_txed: bool,
    segments: SegmentList,
}

impl Default for PdcpSduInfo {
    fn default() -> Self {
        Self {
            sn: INVALID_PDCP_SN,
            fully_txed: false,
            segments: SegmentList::default(),
        }
    }
}

impl PdcpSduInfo {
    fn valid(&self) -> bool {
        self.sn != INVALID_PDCP_SN
    }

    fn fully_acked(&self) -> bool {
        self.fully_txed && self.segments.is_empty()
    }
}

/// Maps in-flight RLC segments to PDCP SDUs
#[derive(Debug)]
pub struct SegmentLedger {
    pool: SegmentPool,
    sdus: Vec<PdcpSduInfo>,
    status_report: PdcpSduInfo,
    nof_sdus: usize,
}

impl Default for SegmentLedger {
    fn default() -> Self {
        Self::with_capacity(SEGMENT_POOL_SIZE, PDCP_INFO_BUFFER_SIZE)
    }
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nof_segments: usize, nof_sdus: usize) -> Self {
        Self {
            pool: SegmentPool::new(nof_segments),
            sdus: vec![PdcpSduInfo::default(); nof_sdus.max(1)],
            status_report: PdcpSduInfo::default(),
            nof_sdus: 0,
        }
    }

    fn slot_mut<'a>(
        sdus: &'a mut [PdcpSduInfo],
        status_report: &'a mut PdcpSduInfo,
        pdcp_sn: u32,
    ) -> &'a mut PdcpSduInfo {
        if pdcp_sn == STATUS_REPORT_SN {
            status_report
        } else {
            let len = sdus.len();
            &mut sdus[pdcp_sn as usize % len]
        }
    }

    fn slot(&self, pdcp_sn: u32) -> &PdcpSduInfo {
        if pdcp_sn == STATUS_REPORT_SN {
            &self.status_report
        } else {
            &self.sdus[pdcp_sn as usize % self.sdus.len()]
        }
    }

    /// A segment slot is available
    pub fn has_segments(&self) -> bool {
        self.pool.nof_free > 0
    }

    pub fn nof_free_segments(&self) -> usize {
        self.pool.nof_free
    }

    /// Number of PDCP SDUs currently tracked
    pub fn nof_sdus(&self) -> usize {
        self.nof_sdus
    }

    pub fn has_pdcp_sn(&self, pdcp_sn: u32) -> bool {
        pdcp_sn != INVALID_PDCP_SN && self.slot(pdcp_sn).sn == pdcp_sn
    }

    /// Start tracking an SDU handed down by PDCP
    pub fn add_pdcp_sdu(&mut self, pdcp_sn: u32) {
        if pdcp_sn == INVALID_PDCP_SN {
            return;
        }
        let occupant = self.slot(pdcp_sn).sn;
        if occupant != INVALID_PDCP_SN {
            if occupant == pdcp_sn {
                warn!("PDCP SN={} added twice, dropping previous delivery state", pdcp_sn);
            }
            self.clear_pdcp_sdu(occupant);
        }
        let info = Self::slot_mut(&mut self.sdus, &mut self.status_report, pdcp_sn);
        info.sn = pdcp_sn;
        info.fully_txed = false;
        self.nof_sdus += 1;
    }

    /// Mark that the last byte of the SDU has been placed in a PDU
    pub fn set_fully_txed(&mut self, pdcp_sn: u32) {
        if !self.has_pdcp_sn(pdcp_sn) {
            return;
        }
        Self::slot_mut(&mut self.sdus, &mut self.status_report, pdcp_sn).fully_txed = true;
    }

    /// Record that part of SDU `pdcp_sn` travels in RLC PDU `rlc_sn`.
    /// Returns false if the SDU is untracked or the arena is exhausted.
    pub fn make_segment(&mut self, rlc_sn: u32, pdu_segments: &mut SegmentList, pdcp_sn: u32) -> bool {
        if !self.has_pdcp_sn(pdcp_sn) {
            return false;
        }
        let Some(id) = self.pool.acquire() else {
            warn!("Segment pool exhausted, cannot track PDCP SN={}", pdcp_sn);
            return false;
        };
        {
            let segment = &mut self.pool.segments[id as usize];
            segment.rlc_sn = rlc_sn;
            segment.pdcp_sn = pdcp_sn;
        }
        self.pool.push_back(ListKind::Pdu, pdu_segments, id);
        let info = Self::slot_mut(&mut self.sdus, &mut self.status_report, pdcp_sn);
        self.pool.push_back(ListKind::Sdu, &mut info.segments, id);
        true
    }

    /// Acknowledge every segment of a PDU; pushes the PDCP SNs that became fully
    /// acknowledged onto `delivered`
    pub fn ack_pdu(&mut self, pdu_segments: &SegmentList, delivered: &mut Vec<u32>) {
        for id in self.pool.ids(ListKind::Pdu, pdu_segments) {
            let pdcp_sn = self.pool.segments[id as usize].pdcp_sn;
            if pdcp_sn == INVALID_PDCP_SN {
                continue;
            }
            let info = Self::slot_mut(&mut self.sdus, &mut self.status_report, pdcp_sn);
            if info.sn != pdcp_sn {
                continue;
            }
            self.pool.unlink(ListKind::Sdu, &mut info.segments, id);
            self.pool.segments[id as usize].pdcp_sn = INVALID_PDCP_SN;
            if info.fully_acked() {
                delivered.push(pdcp_sn);
                *info = PdcpSduInfo::default();
                self.nof_sdus -= 1;
            }
        }
    }

    /// Detach the RLC side of all segments of a PDU that leaves the Tx window
    pub fn release_pdu(&mut self, pdu_segments: &mut SegmentList) {
        for id in self.pool.ids(ListKind::Pdu, pdu_segments) {
            let segment = &mut self.pool.segments[id as usize];
            segment.rlc_sn = INVALID_RLC_SN;
            if segment.pdcp_sn == INVALID_PDCP_SN {
                self.pool.release(id);
            }
        }
        *pdu_segments = SegmentList::default();
    }

    /// PDCP SNs carried by a PDU, in order and without duplicates
    pub fn pdcp_sns(&self, pdu_segments: &SegmentList) -> Vec<u32> {
        let mut sns: Vec<u32> = Vec::new();
        for id in self.pool.ids(ListKind::Pdu, pdu_segments) {
            let pdcp_sn = self.pool.segments[id as usize].pdcp_sn;
            if pdcp_sn != INVALID_PDCP_SN && !sns.contains(&pdcp_sn) {
                sns.push(pdcp_sn);
            }
        }
        sns
    }

    /// Stop tracking an SDU, detaching the PDCP side of its segments
    pub fn clear_pdcp_sdu(&mut self, pdcp_sn: u32) {
        if !self.has_pdcp_sn(pdcp_sn) {
            return;
        }
        let info = Self::slot_mut(&mut self.sdus, &mut self.status_report, pdcp_sn);
        for id in self.pool.ids(ListKind::Sdu, &info.segments) {
            let segment = &mut self.pool.segments[id as usize];
            segment.pdcp_sn = INVALID_PDCP_SN;
            segment.sdu_link = Link::default();
            if segment.rlc_sn == INVALID_RLC_SN {
                self.pool.release(id);
            }
        }
        *info = PdcpSduInfo::default();
        self.nof_sdus -= 1;
    }

    /// Forget everything and return all slots to the free list
    pub fn clear(&mut self) {
        let capacity = self.pool.segments.len();
        self.pool = SegmentPool::new(capacity);
        self.sdus.iter_mut().for_each(|info| *info = PdcpSduInfo::default());
        self.status_report = PdcpSduInfo::default();
        self.nof_sdus = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdu_delivered_when_all_pdus_acked() {
        let mut ledger = SegmentLedger::with_capacity(8, 16);
        let mut pdu0 = SegmentList::default();
        let mut pdu1 = SegmentList::default();

        ledger.add_pdcp_sdu(7);
        assert!(ledger.make_segment(0, &mut pdu0, 7));
        assert!(ledger.make_segment(1, &mut pdu1, 7));
        ledger.set_fully_txed(7);

        let mut delivered = Vec::new();
        ledger.ack_pdu(&pdu1, &mut delivered);
        ledger.release_pdu(&mut pdu1);
        assert!(delivered.is_empty());

        ledger.ack_pdu(&pdu0, &mut delivered);
        ledger.release_pdu(&mut pdu0);
        assert_eq!(delivered, vec![7]);
        assert_eq!(ledger.nof_sdus(), 0);
        assert_eq!(ledger.nof_free_segments(), 8);
    }

    #[test]
    fn test_partially_transmitted_sdu_not_delivered() {
        let mut ledger = SegmentLedger::with_capacity(8, 16);
        let mut pdu = SegmentList::default();
        ledger.add_pdcp_sdu(1);
        ledger.make_segment(0, &mut pdu, 1);

        let mut delivered = Vec::new();
        ledger.ack_pdu(&pdu, &mut delivered);
        assert!(delivered.is_empty());
        assert!(ledger.has_pdcp_sn(1));
    }

    #[test]
    fn test_pdu_carrying_several_sdus() {
        let mut ledger = SegmentLedger::with_capacity(8, 16);
        let mut pdu = SegmentList::default();
        for sn in [3, 4] {
            ledger.add_pdcp_sdu(sn);
            ledger.make_segment(5, &mut pdu, sn);
            ledger.set_fully_txed(sn);
        }
        assert_eq!(ledger.pdcp_sns(&pdu), vec![3, 4]);

        let mut delivered = Vec::new();
        ledger.ack_pdu(&pdu, &mut delivered);
        assert_eq!(delivered, vec![3, 4]);
    }

    #[test]
    fn test_slot_freed_only_when_both_sides_detached() {
        let mut ledger = SegmentLedger::with_capacity(2, 16);
        let mut pdu = SegmentList::default();
        ledger.add_pdcp_sdu(9);
        ledger.make_segment(0, &mut pdu, 9);
        assert_eq!(ledger.nof_free_segments(), 1);

        ledger.release_pdu(&mut pdu);
        assert_eq!(ledger.nof_free_segments(), 1);
        ledger.clear_pdcp_sdu(9);
        assert_eq!(ledger.nof_free_segments(), 2);
    }

    #[test]
    fn test_pool_exhaustion_fails_gracefully() {
        let mut ledger = SegmentLedger::with_capacity(1, 16);
        let mut pdu = SegmentList::default();
        ledger.add_pdcp_sdu(0);
        ledger.add_pdcp_sdu(1);
        assert!(ledger.make_segment(0, &mut pdu, 0));
        assert!(!ledger.has_segments());
        assert!(!ledger.make_segment(0, &mut pdu, 1));
        assert!(!ledger.make_segment(0, &mut pdu, 42));
    }

    #[test]
    fn test_status_report_sn_tracked_separately() {
        let mut ledger = SegmentLedger::with_capacity(4, 4);
        ledger.add_pdcp_sdu(STATUS_REPORT_SN);
        ledger.add_pdcp_sdu(2);
        assert!(ledger.has_pdcp_sn(STATUS_REPORT_SN));
        assert!(ledger.has_pdcp_sn(2));
        ledger.add_pdcp_sdu(6);
        assert!(!ledger.has_pdcp_sn(2));
        assert_eq!(ledger.nof_sdus(), 2);
    }
}
