//! This module contains the memory backends that capture reads from and patch-apply routines write to

use std::ptr;

use region::Protection;

use crate::error::{Error, Result};

/// Size of a machine word on the target
pub const WORD: usize = 4;

/// Byte-addressable view of the target's address space
pub trait TargetMemory {
    /// Whether `[address, address + len)` lies entirely inside this memory
    fn contains(&self, address: u32, len: usize) -> bool;

    /// Fills `buf` with the bytes starting at `address`
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<()>;

    /// Stores `data` starting at `address`
    fn write(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Reads `count` little-endian words starting at `address`
    fn read_words(&self, address: u32, count: usize) -> Result<Vec<u32>> {
        let mut buf = vec![0u8; count * WORD];
        self.read(address, &mut buf)?;
        Ok(buf
            .chunks_exact(WORD)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    /// Writes `words` little-endian starting at `address`
    fn write_words(&mut self, address: u32, words: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(address, &bytes)
    }
}

/// Translates `[address, address + len)` into an offset inside a window of `size` bytes mapped at `base`
fn window_offset(base: u32, size: usize, address: u32, len: usize) -> Option<usize> {
    let offset = address.checked_sub(base)? as usize;
    if (offset as u64) + (len as u64) <= size as u64 {
        Some(offset)
    } else {
        None
    }
}

/// Owned copy of a firmware memory region mapped at a fixed base address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamImage {
    /// Address of the first byte
    base: u32,
    /// Image contents
    bytes: Vec<u8>,
}

impl RamImage {
    /// Maps `bytes` at `base`
    pub fn new(base: u32, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Image contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl TargetMemory for RamImage {
    fn contains(&self, address: u32, len: usize) -> bool {
        window_offset(self.base, self.bytes.len(), address, len).is_some()
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<()> {
        let offset = window_offset(self.base, self.bytes.len(), address, buf.len()).ok_or(
            Error::MemoryUnreadable {
                address,
                len: buf.len(),
            },
        )?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let offset = window_offset(self.base, self.bytes.len(), address, data.len()).ok_or(
            Error::MemoryUnwritable {
                address,
                len: data.len(),
            },
        )?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Live memory behind a raw pointer, for running the capture hook in-process
///
/// Writes lift page protection for their own duration, so read-only code and data can be patched.
pub struct RawMemory {
    /// Target address that `ptr` corresponds to
    base: u32,
    /// Start of the mapped range
    ptr: *mut u8,
    /// Length of the mapped range
    len: usize,
}

impl RawMemory {
    /// Maps `len` bytes at `ptr` so that target address `base` refers to `ptr`
    ///
    /// # Safety
    ///
    /// `ptr` must be [https://doc.rust-lang.org/stable/std/ptr/index.html#safety](valid) for reads of `len` bytes
    /// for as long as the returned value lives, and writable once its protection is lifted.
    /// The memory **MUST NOT** be accessed through Rust references while the returned value is in use.
    pub unsafe fn new(base: u32, ptr: *mut u8, len: usize) -> Self {
        Self { base, ptr, len }
    }
}

impl TargetMemory for RawMemory {
    fn contains(&self, address: u32, len: usize) -> bool {
        window_offset(self.base, self.len, address, len).is_some()
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<()> {
        let offset = window_offset(self.base, self.len, address, buf.len()).ok_or(
            Error::MemoryUnreadable {
                address,
                len: buf.len(),
            },
        )?;
        // Safety: range was checked against the mapping, which the creator guarantees is readable
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let offset = window_offset(self.base, self.len, address, data.len()).ok_or(
            Error::MemoryUnwritable {
                address,
                len: data.len(),
            },
        )?;
        // Safety: range was checked against the mapping; the handle restores the previous protection on drop
        unsafe {
            let location = self.ptr.add(offset);
            let _guard = region::protect_with_handle(location, data.len(), Protection::all())
                .map_err(|source| Error::ProtectionError { address, source })?;
            ptr::copy_nonoverlapping(data.as_ptr(), location, data.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::memory::{RamImage, RawMemory, TargetMemory};
    use crate::error::ErrorKind;

    #[test]
    /// Reads and writes are translated by the base address and bounds-checked
    fn test_ram_image() {
        let mut image = RamImage::new(0x1000, vec![0; 16]);
        image.write_words(0x1004, &[0x1122_3344]).unwrap();
        assert_eq!(image.bytes()[4..8], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(image.read_words(0x1004, 1).unwrap(), [0x1122_3344]);

        assert_eq!(image.read_words(0x0FFC, 1).unwrap_err().kind(), ErrorKind::MemoryUnreadable);
        assert_eq!(image.read_words(0x100E, 1).unwrap_err().kind(), ErrorKind::MemoryUnreadable);
        assert_eq!(image.write(0x1010, &[1]).unwrap_err().kind(), ErrorKind::MemoryUnwritable);
        // the last byte is still in range
        image.write(0x100F, &[9]).unwrap();
    }

    #[test]
    /// Raw memory patches live bytes and leaves neighbours alone
    fn test_raw_memory() {
        let mut data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let ptr = data.as_mut_ptr();

        {
            let mut memory = unsafe { RawMemory::new(0x2000_0000, ptr, 8) };
            assert_eq!(memory.read_words(0x2000_0004, 1).unwrap(), [0x0807_0605]);

            memory.write(0x2000_0001, &[0xAA, 0xBB]).unwrap();
            assert!(memory.write(0x2000_0007, &[0, 0]).is_err());
        }

        assert_eq!(data, [1, 0xAA, 0xBB, 4, 5, 6, 7, 8]);
    }
}
