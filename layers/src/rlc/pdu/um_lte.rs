//! LTE UMD PDU header (TS 36.322 section 6.2.1.3)
//!
//! ```text
//!  5-bit SN   | FI(2) | E | SN(5) |
//!  10-bit SN  | R R R | FI(2) | E | SN(10) |
//! ```

use super::{ensure_len, li_packed_len, read_lis, write_lis, PduError};
use bytes::{BufMut, BytesMut};
use common::types::FramingInfo;

/// SN field length of an LTE UM bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UmLteSnSize {
    Size5Bits,
    Size10Bits,
}

impl UmLteSnSize {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(Self::Size5Bits),
            10 => Some(Self::Size10Bits),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Size5Bits => 5,
            Self::Size10Bits => 10,
        }
    }

    /// Size of the fixed header part
    pub fn fixed_header_len(self) -> usize {
        match self {
            Self::Size5Bits => 1,
            Self::Size10Bits => 2,
        }
    }
}

/// Decoded UMD PDU header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmdPduHeader {
    pub fi: FramingInfo,
    pub sn: u32,
    pub li: Vec<u16>,
}

impl UmdPduHeader {
    pub fn new(sn: u32) -> Self {
        Self {
            fi: FramingInfo::START_AND_END_ALIGNED,
            sn,
            li: Vec::new(),
        }
    }
}

pub fn packed_length(header: &UmdPduHeader, sn_size: UmLteSnSize) -> usize {
    sn_size.fixed_header_len() + li_packed_len(header.li.len())
}

pub fn read_header(data: &[u8], sn_size: UmLteSnSize) -> Result<(UmdPduHeader, usize), PduError> {
    ensure_len(data, sn_size.fixed_header_len())?;
    let (fi, extended, sn) = match sn_size {
        UmLteSnSize::Size5Bits => (
            FramingInfo::from_field(data[0] >> 6),
            data[0] & 0x20 != 0,
            u32::from(data[0] & 0x1F),
        ),
        UmLteSnSize::Size10Bits => {
            if data[0] & 0xE0 != 0 {
                return Err(PduError::ReservedBits);
            }
            (
                FramingInfo::from_field(data[0] >> 3),
                data[0] & 0x04 != 0,
                (u32::from(data[0] & 0x03) << 8) | u32::from(data[1]),
            )
        }
    };
    let li = read_lis(&data[sn_size.fixed_header_len()..], extended)?;
    let header = UmdPduHeader { fi, sn, li };
    let len = packed_length(&header, sn_size);
    ensure_len(data, len)?;
    Ok((header, len))
}

pub fn write_header(header: &UmdPduHeader, sn_size: UmLteSnSize, buf: &mut BytesMut) -> usize {
    let start = buf.len();
    let e = u8::from(!header.li.is_empty());
    let fi = header.fi.bits() & 0x03;
    match sn_size {
        UmLteSnSize::Size5Bits => {
            buf.put_u8((fi << 6) | (e << 5) | (header.sn & 0x1F) as u8);
        }
        UmLteSnSize::Size10Bits => {
            buf.put_u8((fi << 3) | (e << 2) | ((header.sn >> 8) & 0x03) as u8);
            buf.put_u8((header.sn & 0xFF) as u8);
        }
    }
    write_lis(&header.li, buf);
    buf.len() - start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_5bit_header() {
        let header = UmdPduHeader {
            fi: FramingInfo::NOT_START_ALIGNED,
            sn: 17,
            li: vec![],
        };
        let mut buf = BytesMut::new();
        assert_eq!(write_header(&header, UmLteSnSize::Size5Bits, &mut buf), 1);
        assert_eq!(buf[0], 0x91);
        let (decoded, len) = read_header(&buf, UmLteSnSize::Size5Bits).unwrap();
        assert_eq!(len, 1);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_10bit_header_with_li() {
        let header = UmdPduHeader {
            fi: FramingInfo::NOT_END_ALIGNED,
            sn: 0x2AB,
            li: vec![100],
        };
        let mut buf = BytesMut::new();
        write_header(&header, UmLteSnSize::Size10Bits, &mut buf);
        assert_eq!(&buf[..], &[0x0E, 0xAB, 0x06, 0x40]);
        assert_eq!(packed_length(&header, UmLteSnSize::Size10Bits), 4);
        let (decoded, _) = read_header(&buf, UmLteSnSize::Size10Bits).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_10bit_reserved_bits_rejected() {
        assert_eq!(
            read_header(&[0x20, 0x00], UmLteSnSize::Size10Bits),
            Err(PduError::ReservedBits)
        );
    }
}
