//! This module contains the diagnostic read path: "what did this range hold before patching"

use log::debug;
use nom::number::complete::le_u32;
use nom::sequence::pair;

use crate::error::{Error, Result};

use super::memory::TargetMemory;
use super::CaptureTable;

/// Request for the pre-patch contents of `[start, start + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticRequest {
    /// First address of the range
    pub start: u32,
    /// Length of the range in bytes
    pub length: u32,
}

impl DiagnosticRequest {
    /// Decodes a request from an ioctl buffer: little-endian start address, then little-endian length
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (_, (start, length)) = pair(le_u32::<_, nom::error::Error<&[u8]>>, le_u32)(buf).map_err(|_| {
            Error::MalformedRecord {
                offset: 0,
                reason: "diagnostic request shorter than 8 bytes",
            }
        })?;
        Ok(Self { start, length })
    }

    /// Answers the request: current memory with every captured original laid over it
    pub fn serve<M: TargetMemory + ?Sized>(&self, captures: &CaptureTable, memory: &M) -> Result<Vec<u8>> {
        read_original(captures, memory, self.start, self.length as usize)
    }
}

/// Reconstructs `length` bytes at `start` as they were before any captured patch was applied
///
/// Bytes outside every capture window come from `memory` unchanged. The range is checked against the
/// backend before anything is allocated for it.
pub fn read_original<M: TargetMemory + ?Sized>(
    captures: &CaptureTable,
    memory: &M,
    start: u32,
    length: usize,
) -> Result<Vec<u8>> {
    if !memory.contains(start, length) {
        return Err(Error::MemoryUnreadable { address: start, len: length });
    }
    let mut buf = vec![0u8; length];
    memory.read(start, &mut buf)?;
    captures.overlay(start, &mut buf);
    debug!("served {} original byte(s) at {:#010x}", length, start);
    Ok(buf)
}
