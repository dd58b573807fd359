//! Bounded SDU queue between PDCP and the RLC transmitter

use bytes::Bytes;
use common::types::INVALID_PDCP_SN;
use std::collections::VecDeque;

/// An SDU handed down by PDCP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlcSdu {
    /// PDCP SN used for delivery notifications and discard
    pub pdcp_sn: u32,
    pub payload: Bytes,
}

impl RlcSdu {
    pub fn new(pdcp_sn: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            pdcp_sn,
            payload: payload.into(),
        }
    }

    /// SDU without PDCP SN, e.g. on SRB0
    pub fn unnumbered(payload: impl Into<Bytes>) -> Self {
        Self::new(INVALID_PDCP_SN, payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// FIFO of SDUs with byte accounting that refuses new SDUs when full
#[derive(Debug, Clone)]
pub struct SduQueue {
    queue: VecDeque<RlcSdu>,
    capacity: usize,
    nof_bytes: usize,
}

impl SduQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            nof_bytes: 0,
        }
    }

    /// Enqueue an SDU, handing it back if the queue is full
    pub fn try_write(&mut self, sdu: RlcSdu) -> Result<(), RlcSdu> {
        if self.is_full() {
            return Err(sdu);
        }
        self.nof_bytes += sdu.len();
        self.queue.push_back(sdu);
        Ok(())
    }

    pub fn read(&mut self) -> Option<RlcSdu> {
        let sdu = self.queue.pop_front()?;
        self.nof_bytes -= sdu.len();
        Some(sdu)
    }

    /// Put an SDU back at the head of the queue, ignoring the capacity
    pub fn push_front(&mut self, sdu: RlcSdu) {
        self.nof_bytes += sdu.len();
        self.queue.push_front(sdu);
    }

    pub fn front(&self) -> Option<&RlcSdu> {
        self.queue.front()
    }

    /// Remove the queued SDU with the given PDCP SN
    pub fn discard(&mut self, pdcp_sn: u32) -> bool {
        match self.queue.iter().position(|sdu| sdu.pdcp_sn == pdcp_sn) {
            Some(pos) => {
                if let Some(sdu) = self.queue.remove(pos) {
                    self.nof_bytes -= sdu.len();
                }
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.nof_bytes
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.nof_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fails_closed() {
        let mut queue = SduQueue::new(2);
        assert!(queue.try_write(RlcSdu::new(0, vec![1, 2, 3])).is_ok());
        assert!(queue.try_write(RlcSdu::new(1, vec![4])).is_ok());
        let rejected = queue.try_write(RlcSdu::new(2, vec![5, 6]));
        assert_eq!(rejected.map_err(|sdu| sdu.pdcp_sn), Err(2));
        assert_eq!(queue.size_bytes(), 4);
    }

    #[test]
    fn test_discard_by_pdcp_sn() {
        let mut queue = SduQueue::new(4);
        for sn in 0..3 {
            queue.try_write(RlcSdu::new(sn, vec![0u8; 10])).unwrap();
        }
        assert!(queue.discard(1));
        assert!(!queue.discard(1));
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.size_bytes(), 20);
        assert_eq!(queue.read().map(|s| s.pdcp_sn), Some(0));
        assert_eq!(queue.read().map(|s| s.pdcp_sn), Some(2));
        assert!(queue.is_empty());
    }
}
