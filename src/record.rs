//! Wire format of data file and hint file records.
//!
//! A data record is framed as, in network byte order:
//!
//! ```text
//! crc: u32 | version: u64 | ksz: u32 | value_sz: u64 | key | value
//! ```
//!
//! The CRC-32 (IEEE) covers everything after the crc field in wire order
//! and is accumulated across the header tail, the key, and the value. A
//! record whose `value_sz` equals [`TOMBSTONE`] marks a delete and carries
//! no value bytes.
//!
//! Hint records mirror the index entry derivable from a data record and
//! carry no checksum:
//!
//! ```text
//! version: u64 | value_sz: u64 | value_pos: u64 | ksz: u32 | key
//! ```

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

/// Size of a data record header on disk.
pub(crate) const DATA_HEADER_SIZE: usize = 24;

/// Size of a hint record header on disk.
pub(crate) const HINT_HEADER_SIZE: usize = 28;

/// Reserved `value_sz` marking a deleted key. Reserving the top length
/// keeps every possible byte sequence usable as a real value; only the
/// maximum size is sacrificed.
pub(crate) const TOMBSTONE: u64 = u64::MAX;

/// Longest accepted key.
pub(crate) const MAX_KEY_SIZE: u64 = u32::MAX as u64;

/// Longest accepted value.
pub(crate) const MAX_VALUE_SIZE: u64 = TOMBSTONE - 1;

/// Decoded data record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataHeader {
    pub crc: u32,
    pub version: u64,
    pub ksz: u32,
    pub value_sz: u64,
}

impl DataHeader {
    pub fn decode(buf: &[u8; DATA_HEADER_SIZE]) -> Self {
        Self {
            crc: BigEndian::read_u32(&buf[..4]),
            version: BigEndian::read_u64(&buf[4..12]),
            ksz: BigEndian::read_u32(&buf[12..16]),
            value_sz: BigEndian::read_u64(&buf[16..24]),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_sz == TOMBSTONE
    }
}

/// Encodes a data record header for the given payload, filling in the
/// checksum over the header tail, the key, and the value.
pub(crate) fn encode_data_header(
    version: u64,
    key: &[u8],
    value_sz: u64,
    value: &[u8],
) -> [u8; DATA_HEADER_SIZE] {
    let mut buf = [0u8; DATA_HEADER_SIZE];
    BigEndian::write_u64(&mut buf[4..12], version);
    BigEndian::write_u32(&mut buf[12..16], key.len() as u32);
    BigEndian::write_u64(&mut buf[16..24], value_sz);
    let crc = record_checksum(&buf[4..], key, value);
    BigEndian::write_u32(&mut buf[..4], crc);
    buf
}

/// Checksum of one record, accumulated exactly as the bytes lie on disk.
pub(crate) fn record_checksum(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut crc = crc32fast::Hasher::new();
    crc.update(header_tail);
    crc.update(key);
    crc.update(value);
    crc.finalize()
}

/// One hint file entry, pointing at a live record of the sibling data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hint {
    pub version: u64,
    pub value_sz: u64,
    pub value_pos: u64,
    pub key: Bytes,
}

impl Hint {
    pub fn encode_header(&self) -> [u8; HINT_HEADER_SIZE] {
        let mut buf = [0u8; HINT_HEADER_SIZE];
        BigEndian::write_u64(&mut buf[..8], self.version);
        BigEndian::write_u64(&mut buf[8..16], self.value_sz);
        BigEndian::write_u64(&mut buf[16..24], self.value_pos);
        BigEndian::write_u32(&mut buf[24..28], self.key.len() as u32);
        buf
    }
}

/// Decoded hint record header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HintHeader {
    pub version: u64,
    pub value_sz: u64,
    pub value_pos: u64,
    pub ksz: u32,
}

impl HintHeader {
    pub fn decode(buf: &[u8; HINT_HEADER_SIZE]) -> Self {
        Self {
            version: BigEndian::read_u64(&buf[..8]),
            value_sz: BigEndian::read_u64(&buf[8..16]),
            value_pos: BigEndian::read_u64(&buf[16..24]),
            ksz: BigEndian::read_u32(&buf[24..28]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_header_fields_sit_at_their_wire_offsets() {
        let buf = encode_data_header(0x0102_0304_0506_0708, b"key", 5, b"value");
        assert_eq!(&buf[4..12], &0x0102_0304_0506_0708u64.to_be_bytes());
        assert_eq!(&buf[12..16], &3u32.to_be_bytes());
        assert_eq!(&buf[16..24], &5u64.to_be_bytes());

        let header = DataHeader::decode(&buf);
        assert_eq!(header.version, 0x0102_0304_0506_0708);
        assert_eq!(header.ksz, 3);
        assert_eq!(header.value_sz, 5);
        assert!(!header.is_tombstone());
    }

    #[test]
    fn tombstone_header_has_no_value_size() {
        let buf = encode_data_header(1, b"key", TOMBSTONE, &[]);
        assert!(DataHeader::decode(&buf).is_tombstone());
    }

    #[test]
    fn checksum_covers_header_key_and_value() {
        let buf = encode_data_header(42, b"key", 5, b"value");
        let header = DataHeader::decode(&buf);
        assert_eq!(header.crc, record_checksum(&buf[4..], b"key", b"value"));

        // Any single flipped byte after the crc field must be caught.
        let mut record: Vec<u8> = Vec::new();
        record.extend_from_slice(&buf);
        record.extend_from_slice(b"key");
        record.extend_from_slice(b"value");
        for i in 4..record.len() {
            let mut mutated = record.clone();
            mutated[i] ^= 0x01;
            let crc = record_checksum(&mutated[4..24], &mutated[24..27], &mutated[27..]);
            assert_ne!(crc, header.crc, "flip at offset {i} went undetected");
        }
    }

    #[test]
    fn checksum_is_incremental_across_boundaries() {
        let buf = encode_data_header(7, b"ab", 2, b"cd");
        let whole = {
            let mut crc = crc32fast::Hasher::new();
            crc.update(&buf[4..]);
            crc.update(b"abcd");
            crc.finalize()
        };
        assert_eq!(DataHeader::decode(&buf).crc, whole);
    }

    #[test]
    fn hint_header_roundtrip() {
        let hint = Hint {
            version: 9,
            value_sz: 100,
            value_pos: 2048,
            key: Bytes::from_static(b"carrot"),
        };
        let header = HintHeader::decode(&hint.encode_header());
        assert_eq!(header.version, 9);
        assert_eq!(header.value_sz, 100);
        assert_eq!(header.value_pos, 2048);
        assert_eq!(header.ksz, 6);
    }
}
