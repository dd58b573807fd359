//! Message Types exchanged across the RLC boundaries

use serde::{Deserialize, Serialize};

/// Pending data of one bearer as reported to the MAC scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Bytes of new data (SDUs not yet sent, including header estimate)
    pub newtx_bytes: u32,
    /// Bytes of priority data (status reports and retransmissions)
    pub prio_bytes: u32,
}

impl BufferState {
    /// Create a new buffer state report
    pub fn new(newtx_bytes: u32, prio_bytes: u32) -> Self {
        Self { newtx_bytes, prio_bytes }
    }
    
    /// Total number of bytes the bearer would like to send
    pub fn total(&self) -> u32 {
        self.newtx_bytes + self.prio_bytes
    }
    
    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_buffer_state_total() {
        let bs = BufferState::new(100, 7);
        assert_eq!(bs.total(), 107);
        assert!(!bs.is_empty());
        assert!(BufferState::default().is_empty());
    }
    
    #[test]
    fn test_buffer_state_serialization() {
        let bs = BufferState::new(12, 3);
        let json = serde_json::to_string(&bs).unwrap();
        assert_eq!(json, r#"{"newtx_bytes":12,"prio_bytes":3}"#);
    }
}
