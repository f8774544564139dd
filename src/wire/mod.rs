//! # Wire
//!
//! This module covers the vendor's RAM patch-loading command stream: size-bounded write-memory records
//! followed by a single launch record.
//!
//! Every record is a little-endian 2-byte opcode, a 1-byte length and `length` bytes of parameters.
//! Write-memory parameters are a little-endian 4-byte address followed by the data.

pub mod decode;

use crate::error::{Error, Result};
use crate::fragment::{AddressedFragment, PatchKind};

/// Opcode of the write-memory command
pub const WRITE_RAM_OPCODE: u16 = 0xFC4C;
/// Opcode of the launch command
pub const LAUNCH_RAM_OPCODE: u16 = 0xFC4E;
/// Size of the address field inside a write-memory record
pub const ADDRESS_LEN: usize = 4;
/// Largest data chunk a single write-memory record can carry. The length byte covers the address field too
pub const MAX_CHUNK: usize = u8::MAX as usize - ADDRESS_LEN;
/// Address field of the launch command
pub const LAUNCH_ADDRESS: [u8; ADDRESS_LEN] = [0xFF; ADDRESS_LEN];
/// Parameters of the launch command: length 4, then the all-ones address
pub const LAUNCH_PAYLOAD: [u8; 5] = [0x04, 0xFF, 0xFF, 0xFF, 0xFF];

/// One write-memory command
///
/// Records never carry more than [`MAX_CHUNK`] bytes, so the length byte can't overflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Address the data lands at
    address: u32,
    /// At most [`MAX_CHUNK`] bytes
    data: Vec<u8>,
}

impl WriteRecord {
    /// Creates a record, rejecting data that doesn't fit one command
    pub fn new(address: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_CHUNK {
            return Err(Error::SizeMismatch {
                address,
                kind: PatchKind::RawBytes,
                len: data.len(),
            });
        }
        Ok(Self { address, data })
    }

    /// Creates a record from a chunk already known to fit
    fn from_chunk(address: u32, data: &[u8]) -> Self {
        debug_assert!(data.len() <= MAX_CHUNK);
        Self {
            address,
            data: data.to_vec(),
        }
    }

    /// Address the data lands at
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Data carried by the record
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Appends the encoded record to `out`
    pub fn write_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&WRITE_RAM_OPCODE.to_le_bytes());
        // bounded by MAX_CHUNK on construction
        out.push((ADDRESS_LEN + self.data.len()) as u8);
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.data);
    }

    /// Number of bytes [`WriteRecord::write_into`] appends
    pub fn encoded_len(&self) -> usize {
        2 + 1 + ADDRESS_LEN + self.data.len()
    }
}

/// The terminating command that makes the firmware leave patch-loading mode and boot from patched RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchRecord;

impl LaunchRecord {
    /// Appends the encoded record to `out`
    pub fn write_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LAUNCH_RAM_OPCODE.to_le_bytes());
        out.extend_from_slice(&LAUNCH_PAYLOAD);
    }
}

/// Any record found in a command stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Write-memory command
    Write(WriteRecord),
    /// Launch command
    Launch(LaunchRecord),
}

/// Splits a fragment's payload into write-memory records
///
/// Chunk `i` covers `payload[i * MAX_CHUNK..]` and lands at `address + i * MAX_CHUNK`, so records come out
/// contiguous and address-ascending. Callers must keep that order: some RAM regions sit behind
/// auto-incrementing controllers.
pub fn encode(fragment: &AddressedFragment) -> Vec<WriteRecord> {
    fragment
        .payload()
        .chunks(MAX_CHUNK)
        .enumerate()
        .map(|(i, chunk)| {
            // fragments are validated against the end of the address space, so this can't wrap
            WriteRecord::from_chunk(fragment.address() + (i * MAX_CHUNK) as u32, chunk)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::error::ErrorKind;
    use crate::fragment::AddressedFragment;
    use crate::wire::{encode, LaunchRecord, WriteRecord, MAX_CHUNK};

    #[test]
    /// Record layout on the wire
    fn test_write_record_bytes() {
        let record = WriteRecord::new(0x0021_0A40, vec![0xAA, 0xBB]).unwrap();
        let mut out = Vec::new();
        record.write_into(&mut out);
        assert_eq!(out, [0x4C, 0xFC, 0x06, 0x40, 0x0A, 0x21, 0x00, 0xAA, 0xBB]);
        assert_eq!(out.len(), record.encoded_len());
    }

    #[test]
    /// Launch record is fixed
    fn test_launch_record_bytes() {
        let mut out = Vec::new();
        LaunchRecord.write_into(&mut out);
        assert_eq!(out, [0x4E, 0xFC, 0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    /// A full chunk's length byte saturates the 8-bit field
    fn test_full_chunk_length_byte() {
        let record = WriteRecord::new(0, vec![0; MAX_CHUNK]).unwrap();
        let mut out = Vec::new();
        record.write_into(&mut out);
        assert_eq!(out[2], 0xFF);
    }

    #[test]
    /// Data longer than one command can't become a record, so no length byte is ever truncated
    fn test_oversized_record() {
        let err = WriteRecord::new(0x1000, vec![0xAB; 300]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(
            WriteRecord::new(0x1000, vec![0xAB; MAX_CHUNK + 1]).unwrap_err().kind(),
            ErrorKind::SizeMismatch
        );
    }

    #[test]
    /// Exactly one chunk's worth of payload never produces a trailing empty record
    fn test_exact_chunk() {
        let fragment = AddressedFragment::raw(0x1000, vec![7; MAX_CHUNK]).unwrap();
        let records = encode(&fragment);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data().len(), MAX_CHUNK);
    }

    #[test]
    /// 300 bytes split into 251 + 49
    fn test_split() {
        let fragment = AddressedFragment::raw(0x1000, (0..300).map(|b| b as u8).collect()).unwrap();
        let records = encode(&fragment);
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].address(), records[0].data().len()), (0x1000, 251));
        assert_eq!((records[1].address(), records[1].data().len()), (0x10FB, 49));
        assert_eq!(records[1].data()[0], 251);
    }

    proptest! {
        #[test]
        /// Record count, last chunk length and contiguity for any payload length
        fn prop_chunking(len in 1usize..2000, address in 0u32..0x8000_0000) {
            let fragment = AddressedFragment::raw(address, vec![0x5A; len]).unwrap();
            let records = encode(&fragment);

            prop_assert_eq!(records.len(), (len + MAX_CHUNK - 1) / MAX_CHUNK);
            let last = if len % MAX_CHUNK == 0 { MAX_CHUNK } else { len % MAX_CHUNK };
            prop_assert_eq!(records.last().unwrap().data().len(), last);

            prop_assert_eq!(records[0].address(), address);
            for pair in records.windows(2) {
                prop_assert_eq!(pair[1].address(), pair[0].address() + pair[0].data().len() as u32);
            }
            prop_assert_eq!(records.iter().map(|r| r.data().len()).sum::<usize>(), len);
        }
    }
}
