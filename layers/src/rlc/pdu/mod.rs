//! RLC PDU header codecs
//!
//! Bit-exact packing and unpacking of data PDU headers and status PDUs for
//! AM/UM in their LTE (TS 36.322 section 6.2) and NR (TS 38.322 section 6.2)
//! variants. Readers return the decoded header together with its length in
//! bytes; writers append to a `BytesMut` and return the number of bytes written.

pub mod am_lte;
pub mod am_nr;
pub mod um_lte;
pub mod um_nr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Most length indicators accepted in one LTE header
pub const MAX_LIS: usize = 128;

/// Largest value an 11-bit LI can carry
pub const MAX_LI_VALUE: u32 = (1 << 11) - 1;

/// Header decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduError {
    #[error("PDU truncated: {needed} bytes needed, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Reserved bits set in header")]
    ReservedBits,

    #[error("Expected a data PDU")]
    NotDataPdu,

    #[error("Unsupported control PDU type {0}")]
    InvalidCpt(u8),

    #[error("More than {MAX_LIS} length indicators")]
    TooManyLis,

    #[error("Invalid field: {0}")]
    InvalidField(&'static str),
}

pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<(), PduError> {
    if data.len() < needed {
        return Err(PduError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

/// D/C bit of the first byte; false for control PDUs
pub fn is_data_pdu(data: &[u8]) -> bool {
    data.first().map(|b| b & 0x80 != 0).unwrap_or(false)
}

/// Packed size of `nof_lis` alternating 12-bit `E|LI` fields, padded to a byte
pub(crate) fn li_packed_len(nof_lis: usize) -> usize {
    (nof_lis * 3 + 1) / 2
}

/// Append the LI extension part. The E bit of each LI announces the next one.
pub(crate) fn write_lis(lis: &[u16], buf: &mut BytesMut) {
    let n = lis.len();
    let mut i = 0;
    while i < n {
        let e1 = u8::from(i + 1 < n);
        let li1 = lis[i] & 0x7FF;
        buf.put_u8((e1 << 7) | ((li1 >> 4) as u8 & 0x7F));
        let mut shared = ((li1 & 0x0F) as u8) << 4;
        if i + 1 < n {
            let e2 = u8::from(i + 2 < n);
            let li2 = lis[i + 1] & 0x7FF;
            shared |= (e2 << 3) | ((li2 >> 8) as u8 & 0x07);
            buf.put_u8(shared);
            buf.put_u8((li2 & 0xFF) as u8);
        } else {
            buf.put_u8(shared);
        }
        i += 2;
    }
}

/// Parse the LI extension part starting at `data[0]`, given the E bit of the fixed header
pub(crate) fn read_lis(data: &[u8], mut extended: bool) -> Result<Vec<u16>, PduError> {
    let mut lis = Vec::new();
    let mut pos = 0;
    while extended {
        if lis.len() >= MAX_LIS {
            return Err(PduError::TooManyLis);
        }
        if lis.len() % 2 == 0 {
            ensure_len(data, pos + 2)?;
            extended = data[pos] & 0x80 != 0;
            let li = (u16::from(data[pos] & 0x7F) << 4) | u16::from(data[pos + 1] >> 4);
            lis.push(li);
            pos += 1;
        } else {
            ensure_len(data, pos + 2)?;
            extended = data[pos] & 0x08 != 0;
            let li = (u16::from(data[pos] & 0x07) << 8) | u16::from(data[pos + 1]);
            lis.push(li);
            pos += 2;
        }
    }
    if lis.iter().any(|&li| li == 0) {
        return Err(PduError::InvalidField("zero length indicator"));
    }
    Ok(lis)
}

/// Split an LTE data field into its elements as described by the LIs.
/// Returns `None` if the LIs leave no bytes for the last element.
pub fn split_data_field(mut data: Bytes, lis: &[u16]) -> Option<Vec<Bytes>> {
    let total: usize = lis.iter().map(|&li| li as usize).sum();
    if total >= data.len() {
        return None;
    }
    let mut elements = Vec::with_capacity(lis.len() + 1);
    for &li in lis {
        elements.push(data.split_to(li as usize));
    }
    elements.push(data);
    Some(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_data_field() {
        let data = Bytes::from_static(&[1, 2, 3, 4, 5, 6]);
        let elements = split_data_field(data.clone(), &[2, 3]).unwrap();
        assert_eq!(elements, vec![
            Bytes::from_static(&[1, 2]),
            Bytes::from_static(&[3, 4, 5]),
            Bytes::from_static(&[6]),
        ]);
        assert!(split_data_field(data, &[2, 4]).is_none());
    }

    #[test]
    fn test_li_packed_len() {
        assert_eq!(li_packed_len(0), 0);
        assert_eq!(li_packed_len(1), 2);
        assert_eq!(li_packed_len(2), 3);
        assert_eq!(li_packed_len(3), 5);
    }

    #[test]
    fn test_lis_alternate_nibbles() {
        let mut buf = BytesMut::new();
        write_lis(&[0x123, 0x456, 0x7FF], &mut buf);
        // E=1 LI=0x123 | E=1 LI=0x456 | E=0 LI=0x7FF + pad
        assert_eq!(&buf[..], &[0x92, 0x3C, 0x56, 0x7F, 0xF0]);
        assert_eq!(read_lis(&buf, true).unwrap(), vec![0x123, 0x456, 0x7FF]);
    }

    #[test]
    fn test_truncated_lis_rejected() {
        assert!(matches!(
            read_lis(&[0x92], true),
            Err(PduError::Truncated { .. })
        ));
    }

    #[test]
    fn test_data_pdu_detection() {
        assert!(is_data_pdu(&[0x80]));
        assert!(!is_data_pdu(&[0x00]));
        assert!(!is_data_pdu(&[]));
    }
}
