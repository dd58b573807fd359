//! Sequence number arithmetic and fixed-capacity SN-indexed containers
//!
//! ```text
//!        base              base + window_size
//!   -------|------------------------|-------------
//!     old  |    inside the window   |   future
//! ```
//!
//! All SN comparisons are done on offsets relative to a window base, never on
//! raw SN values, so they stay correct across wrap-around.

use std::collections::VecDeque;

/// Modulo SN space of `2^bits` values with a window of half the space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnSpace {
    modulus: u32,
    window_size: u32,
}

impl SnSpace {
    pub const fn new(sn_bits: u8) -> Self {
        let modulus = 1u32 << sn_bits;
        Self {
            modulus,
            window_size: modulus / 2,
        }
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// `sn + n` in the SN space
    pub fn add(&self, sn: u32, n: u32) -> u32 {
        (sn.wrapping_add(n)) % self.modulus
    }

    /// `sn - n` in the SN space
    pub fn sub(&self, sn: u32, n: u32) -> u32 {
        (sn % self.modulus + self.modulus - n % self.modulus) % self.modulus
    }

    /// Distance from `base` to `sn`, in `[0, modulus)`
    pub fn offset(&self, sn: u32, base: u32) -> u32 {
        self.sub(sn, base)
    }

    /// `sn` lies in `[base, base + window_size)`
    pub fn inside(&self, sn: u32, base: u32) -> bool {
        self.offset(sn, base) < self.window_size
    }

    /// `a < b` with both taken relative to `base`
    pub fn lt(&self, a: u32, b: u32, base: u32) -> bool {
        self.offset(a, base) < self.offset(b, base)
    }
}

/// Fixed-capacity map from SN to `T`, indexed by `sn % capacity`
///
/// The capacity equals the window size, so two live SNs never collide.
#[derive(Debug, Clone)]
pub struct SnWindow<T> {
    slots: Vec<Option<(u32, T)>>,
    count: usize,
}

impl<T> SnWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, count: 0 }
    }

    fn index(&self, sn: u32) -> usize {
        sn as usize % self.slots.len()
    }

    /// Insert `value` for `sn`, replacing whatever occupied the slot
    pub fn insert(&mut self, sn: u32, value: T) -> &mut T {
        let idx = self.index(sn);
        let slot = &mut self.slots[idx];
        if slot.is_none() {
            self.count += 1;
        }
        let (_, value) = slot.insert((sn, value));
        value
    }

    pub fn has_sn(&self, sn: u32) -> bool {
        matches!(&self.slots[self.index(sn)], Some((stored, _)) if *stored == sn)
    }

    pub fn get(&self, sn: u32) -> Option<&T> {
        match &self.slots[self.index(sn)] {
            Some((stored, value)) if *stored == sn => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, sn: u32) -> Option<&mut T> {
        let idx = self.index(sn);
        match &mut self.slots[idx] {
            Some((stored, value)) if *stored == sn => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, sn: u32) -> Option<T> {
        if !self.has_sn(sn) {
            return None;
        }
        let idx = self.index(sn);
        self.count -= 1;
        self.slots[idx].take().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.count = 0;
    }

    /// Stored entries in slot order (not SN order)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(sn, value)| (*sn, value)))
    }

    /// Remove every entry for which `keep` returns false
    pub fn retain(&mut self, mut keep: impl FnMut(u32, &mut T) -> bool) {
        for slot in self.slots.iter_mut() {
            let remove = match slot {
                Some((sn, value)) => !keep(*sn, value),
                None => false,
            };
            if remove {
                *slot = None;
                self.count -= 1;
            }
        }
    }
}

/// Pending retransmission of a PDU or of a byte range of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetxEntry {
    pub sn: u32,
    /// A part of the PDU has already been retransmitted
    pub is_segment: bool,
    /// First byte to retransmit
    pub so_start: u32,
    /// One past the last byte to retransmit
    pub so_end: u32,
}

/// Bounded FIFO of pending retransmissions
#[derive(Debug, Clone)]
pub struct RetxQueue {
    queue: VecDeque<RetxEntry>,
    capacity: usize,
}

impl RetxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry; returns false when the queue is full
    pub fn push(&mut self, entry: RetxEntry) -> bool {
        if self.full() {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    pub fn front(&self) -> Option<&RetxEntry> {
        self.queue.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut RetxEntry> {
        self.queue.front_mut()
    }

    pub fn pop(&mut self) -> Option<RetxEntry> {
        self.queue.pop_front()
    }

    pub fn has_sn(&self, sn: u32) -> bool {
        self.queue.iter().any(|e| e.sn == sn)
    }

    pub fn get_mut(&mut self, sn: u32) -> Option<&mut RetxEntry> {
        self.queue.iter_mut().find(|e| e.sn == sn)
    }

    pub fn full(&self) -> bool {
        self.queue.len() >= self.capacity.saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetxEntry> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sn_space_wraparound() {
        let space = SnSpace::new(10);
        assert_eq!(space.modulus(), 1024);
        assert_eq!(space.window_size(), 512);
        assert_eq!(space.add(1023, 2), 1);
        assert_eq!(space.sub(1, 2), 1023);
        assert_eq!(space.offset(3, 1020), 7);
        assert!(space.inside(3, 1020));
        assert!(!space.inside(600, 0));
        assert!(space.lt(1022, 2, 1000));
    }

    #[test]
    fn test_sn_window_collisions_are_detected() {
        let mut window: SnWindow<&str> = SnWindow::new(4);
        window.insert(1, "one");
        assert!(window.has_sn(1));
        assert!(!window.has_sn(5));
        assert_eq!(window.get(5), None);
        assert_eq!(window.remove(5), None);
        assert_eq!(window.len(), 1);

        window.insert(2, "two");
        window.retain(|sn, _| sn != 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.remove(2), Some("two"));
        assert!(window.is_empty());
    }

    #[test]
    fn test_retx_queue_bounds() {
        let mut queue = RetxQueue::new(3);
        let entry = |sn| RetxEntry {
            sn,
            is_segment: false,
            so_start: 0,
            so_end: 10,
        };
        assert!(queue.push(entry(1)));
        assert!(queue.push(entry(2)));
        assert!(queue.full());
        assert!(!queue.push(entry(3)));
        assert!(queue.has_sn(2));
        assert_eq!(queue.pop().map(|e| e.sn), Some(1));
        assert!(!queue.has_sn(1));
    }
}
