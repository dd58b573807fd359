//! NR AMD PDU header and STATUS PDU (TS 38.322 sections 6.2.2.4, 6.2.2.5)
//!
//! ```text
//!  12-bit SN  | D/C | P | SI(2) | SN(12) | [SO(16)]
//!  18-bit SN  | D/C | P | SI(2) | R R | SN(18) | [SO(16)]
//! ```

use super::{ensure_len, PduError};
use bytes::{BufMut, BytesMut};
use common::types::SegmentInfo;
use common::utils::{BitReader, BitWriter};

/// SO_end value meaning "up to the last byte of the SDU"
pub const SO_END_OF_SDU: u32 = 0xFFFF;

/// SN field length of an NR AM bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmNrSnSize {
    Size12Bits,
    Size18Bits,
}

impl AmNrSnSize {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            12 => Some(Self::Size12Bits),
            18 => Some(Self::Size18Bits),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Size12Bits => 12,
            Self::Size18Bits => 18,
        }
    }

    /// Header length without SO
    pub fn min_header_len(self) -> usize {
        match self {
            Self::Size12Bits => 2,
            Self::Size18Bits => 3,
        }
    }

    /// Header length with SO
    pub fn max_header_len(self) -> usize {
        self.min_header_len() + 2
    }

    fn sn_mask(self) -> u32 {
        (1 << self.bits()) - 1
    }
}

/// Decoded AMD PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmNrPduHeader {
    /// Polling bit
    pub p: bool,
    pub si: SegmentInfo,
    pub sn_size: AmNrSnSize,
    pub sn: u32,
    pub so: u32,
}

impl AmNrPduHeader {
    pub fn new(sn_size: AmNrSnSize, sn: u32, si: SegmentInfo, so: u32) -> Self {
        Self {
            p: false,
            si,
            sn_size,
            sn,
            so,
        }
    }
}

pub fn packed_length(header: &AmNrPduHeader) -> usize {
    if header.si.has_so() {
        header.sn_size.max_header_len()
    } else {
        header.sn_size.min_header_len()
    }
}

pub fn read_data_pdu_header(
    data: &[u8],
    sn_size: AmNrSnSize,
) -> Result<(AmNrPduHeader, usize), PduError> {
    ensure_len(data, sn_size.min_header_len())?;
    if data[0] & 0x80 == 0 {
        return Err(PduError::NotDataPdu);
    }
    let si = SegmentInfo::from_field(data[0] >> 4);
    let mut header = AmNrPduHeader {
        p: data[0] & 0x40 != 0,
        si,
        sn_size,
        sn: 0,
        so: 0,
    };
    header.sn = match sn_size {
        AmNrSnSize::Size12Bits => (u32::from(data[0] & 0x0F) << 8) | u32::from(data[1]),
        AmNrSnSize::Size18Bits => {
            if data[0] & 0x0C != 0 {
                return Err(PduError::ReservedBits);
            }
            (u32::from(data[0] & 0x03) << 16) | (u32::from(data[1]) << 8) | u32::from(data[2])
        }
    };
    let mut pos = sn_size.min_header_len();
    if si.has_so() {
        ensure_len(data, pos + 2)?;
        header.so = (u32::from(data[pos]) << 8) | u32::from(data[pos + 1]);
        pos += 2;
    }
    Ok((header, pos))
}

pub fn write_data_pdu_header(header: &AmNrPduHeader, buf: &mut BytesMut) -> usize {
    let start = buf.len();
    let mut b0 = 0x80 | ((header.si as u8) << 4);
    if header.p {
        b0 |= 0x40;
    }
    let sn = header.sn & header.sn_size.sn_mask();
    match header.sn_size {
        AmNrSnSize::Size12Bits => {
            buf.put_u8(b0 | (sn >> 8) as u8);
            buf.put_u8((sn & 0xFF) as u8);
        }
        AmNrSnSize::Size18Bits => {
            buf.put_u8(b0 | (sn >> 16) as u8);
            buf.put_u8(((sn >> 8) & 0xFF) as u8);
            buf.put_u8((sn & 0xFF) as u8);
        }
    }
    if header.si.has_so() {
        buf.put_u16((header.so & 0xFFFF) as u16);
    }
    buf.len() - start
}

/// One NACK entry of an NR status PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmNrNack {
    pub nack_sn: u32,
    /// Inclusive `(so_start, so_end)`; with a range, `so_start` applies to the first SN
    /// and `so_end` to the last one. `so_end == SO_END_OF_SDU` reaches the end of the SDU.
    pub so: Option<(u32, u32)>,
    /// Number of consecutive SNs covered, starting at `nack_sn`
    pub range: Option<u8>,
}

impl AmNrNack {
    pub fn sn(nack_sn: u32) -> Self {
        Self {
            nack_sn,
            so: None,
            range: None,
        }
    }

    pub fn segment(nack_sn: u32, so_start: u32, so_end: u32) -> Self {
        Self {
            nack_sn,
            so: Some((so_start, so_end)),
            range: None,
        }
    }

    /// Number of SNs covered by this entry
    pub fn nof_sns(&self) -> u32 {
        self.range.map(u32::from).unwrap_or(1)
    }

    fn packed_len(&self, sn_size: AmNrSnSize) -> usize {
        let base = match sn_size {
            AmNrSnSize::Size12Bits => 2,
            AmNrSnSize::Size18Bits => 3,
        };
        base + if self.so.is_some() { 4 } else { 0 } + if self.range.is_some() { 1 } else { 0 }
    }
}

/// STATUS PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmNrStatusPdu {
    pub sn_size: AmNrSnSize,
    pub ack_sn: u32,
    pub nacks: Vec<AmNrNack>,
}

/// Fixed part of a STATUS PDU (D/C, CPT, ACK_SN, E1, R)
pub const STATUS_HEADER_LEN: usize = 3;

impl AmNrStatusPdu {
    pub fn new(sn_size: AmNrSnSize, ack_sn: u32) -> Self {
        Self {
            sn_size,
            ack_sn,
            nacks: Vec::new(),
        }
    }

    pub fn packed_length(&self) -> usize {
        STATUS_HEADER_LEN
            + self
                .nacks
                .iter()
                .map(|n| n.packed_len(self.sn_size))
                .sum::<usize>()
    }

    /// Total number of SNs reported missing
    pub fn nof_nacked_sns(&self) -> u32 {
        self.nacks.iter().map(AmNrNack::nof_sns).sum()
    }

    /// Append a NACK, folding it into the previous entry when both cover whole SDUs
    /// and are consecutive
    pub fn push_nack(&mut self, nack: AmNrNack) {
        let modulus = 1u32 << self.sn_size.bits();
        if let Some(last) = self.nacks.last_mut() {
            let contiguous = (last.nack_sn + last.nof_sns()) % modulus == nack.nack_sn;
            let whole = last.so.is_none() && nack.so.is_none() && nack.range.is_none();
            if contiguous && whole && last.nof_sns() < u32::from(u8::MAX) {
                last.range = Some((last.nof_sns() + 1) as u8);
                return;
            }
        }
        self.nacks.push(nack);
    }

    /// Drop trailing NACKs until the PDU fits in `max_len` bytes. ACK_SN is lowered to
    /// the first SN no longer reported. Returns false if not even the header fits.
    pub fn trim(&mut self, max_len: usize) -> bool {
        if max_len < STATUS_HEADER_LEN {
            return false;
        }
        while self.packed_length() > max_len {
            match self.nacks.pop() {
                Some(nack) => self.ack_sn = nack.nack_sn,
                None => return false,
            }
        }
        true
    }

    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let sn_bits = self.sn_size.bits();
        let mut writer = BitWriter::with_capacity(self.packed_length());
        writer.write(0, 1); // D/C
        writer.write(0, 3); // CPT
        writer.write(self.ack_sn & self.sn_size.sn_mask(), sn_bits);
        writer.write(u32::from(!self.nacks.is_empty()), 1);
        writer.write(0, if sn_bits == 12 { 7 } else { 1 });
        for (i, nack) in self.nacks.iter().enumerate() {
            writer.write(nack.nack_sn & self.sn_size.sn_mask(), sn_bits);
            writer.write(u32::from(i + 1 < self.nacks.len()), 1);
            writer.write(u32::from(nack.so.is_some()), 1);
            writer.write(u32::from(nack.range.is_some()), 1);
            writer.write(0, if sn_bits == 12 { 1 } else { 3 });
            if let Some((so_start, so_end)) = nack.so {
                writer.write(so_start & 0xFFFF, 16);
                writer.write(so_end & 0xFFFF, 16);
            }
            if let Some(range) = nack.range {
                writer.write(u32::from(range), 8);
            }
        }
        let packed = writer.finish();
        buf.extend_from_slice(&packed);
        packed.len()
    }

    pub fn read(data: &[u8], sn_size: AmNrSnSize) -> Result<Self, PduError> {
        let sn_bits = sn_size.bits();
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
        let mut status = AmNrStatusPdu::new(sn_size, reader.read(sn_bits).ok_or_else(truncated)?);
        let mut more = reader.read(1).ok_or_else(truncated)? == 1;
        reader
            .read(if sn_bits == 12 { 7 } else { 1 })
            .ok_or_else(truncated)?;
        while more {
            let nack_sn = reader.read(sn_bits).ok_or_else(truncated)?;
            more = reader.read(1).ok_or_else(truncated)? == 1;
            let has_so = reader.read(1).ok_or_else(truncated)? == 1;
            let has_range = reader.read(1).ok_or_else(truncated)? == 1;
            reader
                .read(if sn_bits == 12 { 1 } else { 3 })
                .ok_or_else(truncated)?;
            let so = if has_so {
                let so_start = reader.read(16).ok_or_else(truncated)?;
                let so_end = reader.read(16).ok_or_else(truncated)?;
                Some((so_start, so_end))
            } else {
                None
            };
            let range = if has_range {
                let range = reader.read(8).ok_or_else(truncated)? as u8;
                if range == 0 {
                    return Err(PduError::InvalidField("zero NACK range"));
                }
                Some(range)
            } else {
                None
            };
            status.nacks.push(AmNrNack { nack_sn, so, range });
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(pdu: &[u8], sn_size: AmNrSnSize) -> AmNrPduHeader {
        let (header, len) = read_data_pdu_header(pdu, sn_size).unwrap();
        let mut buf = BytesMut::new();
        assert_eq!(write_data_pdu_header(&header, &mut buf), len);
        assert_eq!(&buf[..], &pdu[..len]);
        header
    }

    #[test]
    fn test_12bit_headers() {
        let header = decode(&[0x80, 0x00, 0x11, 0x22], AmNrSnSize::Size12Bits);
        assert_eq!(header.si, SegmentInfo::FullSdu);
        assert_eq!(header.sn, 0);

        let header = decode(&[0xD1, 0xFF, 0x11], AmNrSnSize::Size12Bits);
        assert!(header.p);
        assert_eq!(header.si, SegmentInfo::FirstSegment);
        assert_eq!(header.sn, 511);

        let header = decode(&[0xA4, 0x04, 0x04, 0x04, 0x11], AmNrSnSize::Size12Bits);
        assert_eq!(header.si, SegmentInfo::LastSegment);
        assert_eq!(header.sn, 1028);
        assert_eq!(header.so, 1028);
    }

    #[test]
    fn test_18bit_headers() {
        let header = decode(&[0xC2, 0x02, 0x02, 0x11], AmNrSnSize::Size18Bits);
        assert_eq!(header.si, SegmentInfo::FullSdu);
        assert_eq!(header.sn, 131_586);

        let header = decode(&[0xB2, 0x00, 0xFF, 0x02, 0x02, 0x11], AmNrSnSize::Size18Bits);
        assert_eq!(header.si, SegmentInfo::NeitherFirstNorLast);
        assert_eq!(header.sn, 131_327);
        assert_eq!(header.so, 514);
    }

    #[test]
    fn test_18bit_reserved_bits_rejected() {
        assert_eq!(
            read_data_pdu_header(&[0xB7, 0x00, 0xFF, 0x02, 0x02], AmNrSnSize::Size18Bits),
            Err(PduError::ReservedBits)
        );
    }

    fn roundtrip_status(pdu: &[u8], sn_size: AmNrSnSize) -> AmNrStatusPdu {
        let status = AmNrStatusPdu::read(pdu, sn_size).unwrap();
        let mut buf = BytesMut::new();
        assert_eq!(status.write(&mut buf), pdu.len());
        assert_eq!(status.packed_length(), pdu.len());
        assert_eq!(&buf[..], pdu);
        status
    }

    #[test]
    fn test_12bit_status_with_segments() {
        let status = roundtrip_status(
            &[
                0x08, 0x11, 0x80, 0x11, 0x1C, 0x00, 0x02, 0x00, 0x05, 0x11, 0x34, 0x00, 0x05, 0xFF,
                0xFF,
            ],
            AmNrSnSize::Size12Bits,
        );
        assert_eq!(status.ack_sn, 2065);
        assert_eq!(
            status.nacks,
            vec![
                AmNrNack::segment(273, 2, 5),
                AmNrNack::segment(275, 5, SO_END_OF_SDU)
            ]
        );
    }

    #[test]
    fn test_12bit_status_with_ranges() {
        let status = roundtrip_status(
            &[
                0x08, 0x11, 0x80, 0x11, 0x1A, 0x03, 0x11, 0x46, 0x00, 0x02, 0x00, 0x05, 0x04,
            ],
            AmNrSnSize::Size12Bits,
        );
        assert_eq!(status.nacks[0].range, Some(3));
        assert_eq!(status.nacks[0].so, None);
        assert_eq!(status.nacks[1].nack_sn, 276);
        assert_eq!(status.nacks[1].so, Some((2, 5)));
        assert_eq!(status.nacks[1].range, Some(4));
        assert_eq!(status.nof_nacked_sns(), 7);
    }

    #[test]
    fn test_18bit_status() {
        let status = roundtrip_status(&[0x0E, 0x66, 0x64], AmNrSnSize::Size18Bits);
        assert_eq!(status.ack_sn, 235_929);
        assert!(status.nacks.is_empty());

        let status = roundtrip_status(
            &[0x0E, 0x66, 0x66, 0xD9, 0x99, 0x80],
            AmNrSnSize::Size18Bits,
        );
        assert_eq!(status.nacks, vec![AmNrNack::sn(222_822)]);
    }

    #[test]
    fn test_malformed_status_rejected() {
        // E1 still set on the last NACK
        let pdu = [
            0x08, 0x11, 0x80, 0x11, 0x1C, 0x00, 0x02, 0x00, 0x05, 0x11, 0x3C, 0x00, 0x05, 0xFF, 0xFF,
        ];
        assert!(matches!(
            AmNrStatusPdu::read(&pdu, AmNrSnSize::Size12Bits),
            Err(PduError::Truncated { .. })
        ));
    }

    #[test]
    fn test_push_nack_merges_whole_sdus() {
        let mut status = AmNrStatusPdu::new(AmNrSnSize::Size12Bits, 10);
        status.push_nack(AmNrNack::sn(2));
        status.push_nack(AmNrNack::sn(3));
        status.push_nack(AmNrNack::sn(4));
        status.push_nack(AmNrNack::segment(5, 0, 9));
        status.push_nack(AmNrNack::sn(7));
        assert_eq!(status.nacks.len(), 3);
        assert_eq!(status.nacks[0].range, Some(3));
        assert_eq!(status.nof_nacked_sns(), 5);
    }

    #[test]
    fn test_trim_lowers_ack_sn() {
        let mut status = AmNrStatusPdu::new(AmNrSnSize::Size12Bits, 10);
        status.push_nack(AmNrNack::sn(2));
        status.push_nack(AmNrNack::segment(5, 0, 9));
        assert_eq!(status.packed_length(), 3 + 2 + 6);
        assert!(status.trim(6));
        assert_eq!(status.ack_sn, 5);
        assert_eq!(status.nacks, vec![AmNrNack::sn(2)]);
        assert!(!status.trim(2));
    }
}
