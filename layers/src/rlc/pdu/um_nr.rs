//! NR UMD PDU header (TS 38.322 section 6.2.2.3)
//!
//! ```text
//!  full SDU          | SI(2) | R(6) |
//!  6-bit segment     | SI(2) | SN(6) | [SO(16)]
//!  12-bit segment    | SI(2) | R R | SN(12) | [SO(16)]
//! ```
//! SO is present for the last and middle segments only.

use super::{ensure_len, PduError};
use bytes::{BufMut, BytesMut};
use common::types::SegmentInfo;

/// SN field length of an NR UM bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UmNrSnSize {
    Size6Bits,
    Size12Bits,
}

impl UmNrSnSize {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            6 => Some(Self::Size6Bits),
            12 => Some(Self::Size12Bits),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Size6Bits => 6,
            Self::Size12Bits => 12,
        }
    }

    /// Header length of a segment without SO
    pub fn min_segment_header_len(self) -> usize {
        match self {
            Self::Size6Bits => 1,
            Self::Size12Bits => 2,
        }
    }
}

/// Decoded UMD PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmNrPduHeader {
    pub si: SegmentInfo,
    pub sn_size: UmNrSnSize,
    pub sn: u32,
    pub so: u32,
}

impl UmNrPduHeader {
    /// Header of a PDU carrying a complete SDU
    pub fn full_sdu(sn_size: UmNrSnSize) -> Self {
        Self {
            si: SegmentInfo::FullSdu,
            sn_size,
            sn: 0,
            so: 0,
        }
    }
}

pub fn packed_length(header: &UmNrPduHeader) -> usize {
    if header.si == SegmentInfo::FullSdu {
        return 1;
    }
    let so_len = if header.si.has_so() { 2 } else { 0 };
    header.sn_size.min_segment_header_len() + so_len
}

pub fn read_header(data: &[u8], sn_size: UmNrSnSize) -> Result<(UmNrPduHeader, usize), PduError> {
    ensure_len(data, 1)?;
    let si = SegmentInfo::from_field(data[0] >> 6);
    let mut header = UmNrPduHeader {
        si,
        sn_size,
        sn: 0,
        so: 0,
    };

    if si == SegmentInfo::FullSdu {
        if data[0] & 0x3F != 0 {
            return Err(PduError::ReservedBits);
        }
        return Ok((header, 1));
    }

    let mut pos = match sn_size {
        UmNrSnSize::Size6Bits => {
            header.sn = u32::from(data[0] & 0x3F);
            1
        }
        UmNrSnSize::Size12Bits => {
            ensure_len(data, 2)?;
            if data[0] & 0x30 != 0 {
                return Err(PduError::ReservedBits);
            }
            header.sn = (u32::from(data[0] & 0x0F) << 8) | u32::from(data[1]);
            2
        }
    };

    if si.has_so() {
        ensure_len(data, pos + 2)?;
        header.so = (u32::from(data[pos]) << 8) | u32::from(data[pos + 1]);
        pos += 2;
    }
    Ok((header, pos))
}

pub fn write_header(header: &UmNrPduHeader, buf: &mut BytesMut) -> usize {
    let si = (header.si as u8) << 6;
    if header.si == SegmentInfo::FullSdu {
        buf.put_u8(si);
        return 1;
    }
    let start = buf.len();
    match header.sn_size {
        UmNrSnSize::Size6Bits => buf.put_u8(si | (header.sn & 0x3F) as u8),
        UmNrSnSize::Size12Bits => {
            buf.put_u8(si | ((header.sn >> 8) & 0x0F) as u8);
            buf.put_u8((header.sn & 0xFF) as u8);
        }
    }
    if header.si.has_so() {
        buf.put_u16((header.so & 0xFFFF) as u16);
    }
    buf.len() - start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_6bit_full_sdu() {
        let pdu = [0x00, 0x11, 0x22, 0x33, 0x44];
        let (header, len) = read_header(&pdu, UmNrSnSize::Size6Bits).unwrap();
        assert_eq!(header.si, SegmentInfo::FullSdu);
        assert_eq!(len, 1);
        assert_eq!(pdu.len() - len, 4);

        let mut buf = BytesMut::new();
        write_header(&header, &mut buf);
        buf.extend_from_slice(&pdu[len..]);
        assert_eq!(&buf[..], &pdu[..]);
    }

    #[test]
    fn test_6bit_last_segment() {
        let pdu = [0x81, 0x01, 0x02, 0x11, 0x22];
        let (header, len) = read_header(&pdu, UmNrSnSize::Size6Bits).unwrap();
        assert_eq!(header.si, SegmentInfo::LastSegment);
        assert_eq!(header.sn, 1);
        assert_eq!(header.so, 258);
        assert_eq!(len, 3);
        assert_eq!(packed_length(&header), 3);
    }

    #[test]
    fn test_12bit_middle_segment() {
        let pdu = [0xC0, 0x05, 0x01, 0x68, 0x11, 0x22, 0x33];
        let (header, len) = read_header(&pdu, UmNrSnSize::Size12Bits).unwrap();
        assert_eq!(header.si, SegmentInfo::NeitherFirstNorLast);
        assert_eq!(header.sn, 5);
        assert_eq!(header.so, 360);
        assert_eq!(len, 4);

        let mut buf = BytesMut::new();
        assert_eq!(write_header(&header, &mut buf), 4);
        assert_eq!(&buf[..], &pdu[..4]);
    }

    #[test]
    fn test_12bit_first_segment_has_no_so() {
        let header = UmNrPduHeader {
            si: SegmentInfo::FirstSegment,
            sn_size: UmNrSnSize::Size12Bits,
            sn: 0xABC,
            so: 0,
        };
        let mut buf = BytesMut::new();
        write_header(&header, &mut buf);
        assert_eq!(&buf[..], &[0x4A, 0xBC]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        assert_eq!(
            read_header(&[0x01, 0x11], UmNrSnSize::Size6Bits),
            Err(PduError::ReservedBits)
        );
        assert_eq!(
            read_header(&[0x50, 0x01], UmNrSnSize::Size12Bits),
            Err(PduError::ReservedBits)
        );
    }

    #[test]
    fn test_truncated_so_rejected() {
        assert!(matches!(
            read_header(&[0x81, 0x01], UmNrSnSize::Size6Bits),
            Err(PduError::Truncated { .. })
        ));
    }
}
