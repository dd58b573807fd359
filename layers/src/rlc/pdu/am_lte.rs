//! LTE AM data PDU header and STATUS PDU (TS 36.322 sections 6.2.1.4, 6.2.1.5, 6.2.1.6)
//!
//! ```text
//!  AMD PDU           | D/C | RF | P | FI(2) | E | SN(10) |
//!  AMD PDU segment   | D/C | RF | P | FI(2) | E | SN(10) | LSF | SO(15) |
//!  followed by       | E | LI(11) | E | LI(11) | ... | pad to byte |
//! ```

use super::{ensure_len, li_packed_len, read_lis, write_lis, PduError};
use bytes::{BufMut, BytesMut};
use common::types::FramingInfo;
use common::utils::{BitReader, BitWriter};

/// SO_end value meaning "up to the last byte of the PDU"
pub const SO_END_OF_PDU: u32 = 0x7FFF;

/// Fixed part of an AMD PDU header
pub const FIXED_HEADER_LEN: usize = 2;

/// Fixed part of an AMD PDU segment header
pub const SEGMENT_HEADER_LEN: usize = 4;

/// Decoded AMD PDU (segment) header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmdPduHeader {
    /// Re-segmentation flag
    pub rf: bool,
    /// Polling bit
    pub p: bool,
    pub fi: FramingInfo,
    pub sn: u32,
    /// Last segment flag
    pub lsf: bool,
    /// Segment offset in bytes
    pub so: u32,
    /// Length indicators of all but the last data field element
    pub li: Vec<u16>,
}

impl AmdPduHeader {
    pub fn new(sn: u32) -> Self {
        Self {
            sn,
            ..Default::default()
        }
    }
}

/// Header size on the wire
pub fn packed_length(header: &AmdPduHeader) -> usize {
    let fixed = if header.rf {
        SEGMENT_HEADER_LEN
    } else {
        FIXED_HEADER_LEN
    };
    fixed + li_packed_len(header.li.len())
}

/// Decode an AMD PDU header, returning it with its packed length
pub fn read_data_pdu_header(data: &[u8]) -> Result<(AmdPduHeader, usize), PduError> {
    ensure_len(data, FIXED_HEADER_LEN)?;
    if data[0] & 0x80 == 0 {
        return Err(PduError::NotDataPdu);
    }
    let mut header = AmdPduHeader {
        rf: data[0] & 0x40 != 0,
        p: data[0] & 0x20 != 0,
        fi: FramingInfo::from_field(data[0] >> 3),
        sn: (u32::from(data[0] & 0x03) << 8) | u32::from(data[1]),
        ..Default::default()
    };
    let extended = data[0] & 0x04 != 0;

    let mut pos = FIXED_HEADER_LEN;
    if header.rf {
        ensure_len(data, SEGMENT_HEADER_LEN)?;
        header.lsf = data[2] & 0x80 != 0;
        header.so = (u32::from(data[2] & 0x7F) << 8) | u32::from(data[3]);
        pos = SEGMENT_HEADER_LEN;
    }
    header.li = read_lis(&data[pos..], extended)?;

    let len = packed_length(&header);
    ensure_len(data, len)?;
    Ok((header, len))
}

/// Encode an AMD PDU header into `buf`
pub fn write_data_pdu_header(header: &AmdPduHeader, buf: &mut BytesMut) -> usize {
    let start = buf.len();
    let mut b0 = 0x80;
    if header.rf {
        b0 |= 0x40;
    }
    if header.p {
        b0 |= 0x20;
    }
    b0 |= (header.fi.bits() & 0x03) << 3;
    if !header.li.is_empty() {
        b0 |= 0x04;
    }
    b0 |= ((header.sn >> 8) & 0x03) as u8;
    buf.put_u8(b0);
    buf.put_u8((header.sn & 0xFF) as u8);
    if header.rf {
        let lsf = if header.lsf { 0x80 } else { 0 };
        buf.put_u8(lsf | ((header.so >> 8) & 0x7F) as u8);
        buf.put_u8((header.so & 0xFF) as u8);
    }
    write_lis(&header.li, buf);
    buf.len() - start
}

/// One NACK_SN entry, optionally restricted to a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackInfo {
    pub nack_sn: u32,
    /// Inclusive `(so_start, so_end)`; `so_end == SO_END_OF_PDU` reaches the end of the PDU
    pub so: Option<(u32, u32)>,
}

impl NackInfo {
    pub fn sn(nack_sn: u32) -> Self {
        Self { nack_sn, so: None }
    }

    pub fn segment(nack_sn: u32, so_start: u32, so_end: u32) -> Self {
        Self {
            nack_sn,
            so: Some((so_start, so_end)),
        }
    }

    fn packed_bits(&self) -> usize {
        if self.so.is_some() {
            12 + 30
        } else {
            12
        }
    }
}

/// STATUS PDU
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPdu {
    pub ack_sn: u32,
    pub nacks: Vec<NackInfo>,
}

impl StatusPdu {
    pub fn new(ack_sn: u32) -> Self {
        Self {
            ack_sn,
            nacks: Vec::new(),
        }
    }

    /// Size in bytes once packed
    pub fn packed_length(&self) -> usize {
        let bits = 15 + self.nacks.iter().map(NackInfo::packed_bits).sum::<usize>();
        (bits + 7) / 8
    }

    /// A NACK equal to ACK_SN would contradict the ACK
    pub fn is_valid(&self) -> bool {
        self.nacks.iter().all(|n| n.nack_sn != self.ack_sn)
    }

    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let mut writer = BitWriter::with_capacity(self.packed_length());
        writer.write(0, 1); // D/C
        writer.write(0, 3); // CPT
        writer.write(self.ack_sn & 0x3FF, 10);
        writer.write(u32::from(!self.nacks.is_empty()), 1);
        for (i, nack) in self.nacks.iter().enumerate() {
            writer.write(nack.nack_sn & 0x3FF, 10);
            writer.write(u32::from(i + 1 < self.nacks.len()), 1);
            match nack.so {
                Some((so_start, so_end)) => {
                    writer.write(1, 1);
                    writer.write(so_start & 0x7FFF, 15);
                    writer.write(so_end & 0x7FFF, 15);
                }
                None => writer.write(0, 1),
            }
        }
        let packed = writer.finish();
        buf.extend_from_slice(&packed);
        packed.len()
    }

    pub fn read(data: &[u8]) -> Result<Self, PduError> {
        let mut reader = BitReader::new(data);
        let truncated = || PduError::Truncated {
            needed: data.len() + 1,
            available: data.len(),
        };
        if reader.read(1).ok_or_else(truncated)? != 0 {
            return Err(PduError::InvalidField("D/C bit set in STATUS PDU"));
        }
        let cpt = reader.read(3).ok_or_else(truncated)? as u8;
        if cpt != 0 {
            return Err(PduError::InvalidCpt(cpt));
        }
        let mut status = StatusPdu::new(reader.read(10).ok_or_else(truncated)?);
        let mut more = reader.read(1).ok_or_else(truncated)? == 1;
        while more {
            let nack_sn = reader.read(10).ok_or_else(truncated)?;
            more = reader.read(1).ok_or_else(truncated)? == 1;
            let has_so = reader.read(1).ok_or_else(truncated)? == 1;
            let so = if has_so {
                let so_start = reader.read(15).ok_or_else(truncated)?;
                let so_end = reader.read(15).ok_or_else(truncated)?;
                Some((so_start, so_end))
            } else {
                None
            };
            status.nacks.push(NackInfo { nack_sn, so });
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_with_lis() {
        let header = AmdPduHeader {
            p: true,
            fi: FramingInfo::NOT_END_ALIGNED,
            sn: 0x155,
            li: vec![10, 20],
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        assert_eq!(write_data_pdu_header(&header, &mut buf), 5);
        assert_eq!(&buf[..], &[0xAD, 0x55, 0x80, 0xA0, 0x14]);
        assert_eq!(packed_length(&header), 5);

        let (decoded, len) = read_data_pdu_header(&buf).unwrap();
        assert_eq!(len, 5);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_segment_header() {
        let header = AmdPduHeader {
            rf: true,
            fi: FramingInfo::NOT_START_ALIGNED,
            sn: 3,
            lsf: true,
            so: 0x1234,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        write_data_pdu_header(&header, &mut buf);
        assert_eq!(&buf[..], &[0xD0, 0x03, 0x92, 0x34]);
        let (decoded, len) = read_data_pdu_header(&buf).unwrap();
        assert_eq!(len, SEGMENT_HEADER_LEN);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_control_pdu_is_not_data() {
        assert_eq!(read_data_pdu_header(&[0x00, 0x14]), Err(PduError::NotDataPdu));
        assert!(read_data_pdu_header(&[0x84]).is_err());
    }

    #[test]
    fn test_status_ack_only() {
        let status = StatusPdu::new(5);
        let mut buf = BytesMut::new();
        assert_eq!(status.write(&mut buf), 2);
        assert_eq!(&buf[..], &[0x00, 0x14]);
        assert_eq!(StatusPdu::read(&buf).unwrap(), status);
    }

    #[test]
    fn test_status_with_segment_nack() {
        let status = StatusPdu {
            ack_sn: 10,
            nacks: vec![NackInfo::sn(4), NackInfo::segment(7, 100, SO_END_OF_PDU)],
        };
        assert!(status.is_valid());
        let mut buf = BytesMut::new();
        let len = status.write(&mut buf);
        assert_eq!(len, status.packed_length());
        assert_eq!(len, (15 + 12 + 42 + 7) / 8);
        assert_eq!(StatusPdu::read(&buf).unwrap(), status);
    }

    #[test]
    fn test_status_validity() {
        let status = StatusPdu {
            ack_sn: 3,
            nacks: vec![NackInfo::sn(3)],
        };
        assert!(!status.is_valid());
    }

    #[test]
    fn test_status_rejects_unknown_cpt() {
        assert_eq!(StatusPdu::read(&[0x10, 0x00]), Err(PduError::InvalidCpt(1)));
    }
}
