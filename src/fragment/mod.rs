//! # Fragment
//!
//! This module covers addressed fragments, which pair a compiled payload with the firmware address it belongs at

pub mod selector;

use crate::error::{Error, Result};

use self::selector::Selector;

/// How a payload is integrated at its target address
///
/// The on-chip loader writes bytes verbatim, so the kind only constrains the payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchKind {
    /// Single branch instruction slot
    BranchPatch,
    /// Single branch-with-link instruction slot
    BranchLinkPatch,
    /// Plain machine word
    GenericValue,
    /// Verbatim bytes
    RawBytes,
    /// Hook body with its own register save prologue and restore epilogue
    HookWithRegisterSave,
}

impl PatchKind {
    /// Checks that `len` is an acceptable payload length for this kind
    pub fn accepts(self, len: usize) -> bool {
        match self {
            PatchKind::GenericValue => matches!(len, 1 | 2 | 4),
            PatchKind::BranchPatch | PatchKind::BranchLinkPatch => len == 4,
            PatchKind::RawBytes | PatchKind::HookWithRegisterSave => len > 0,
        }
    }
}

/// A compiled payload bound to one fixed firmware address
///
/// Fragments are validated on construction and immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedFragment {
    /// Absolute target address in the firmware's address space
    address: u32,
    /// Bytes to place at `address`
    payload: Vec<u8>,
    /// Integration kind
    kind: PatchKind,
    /// Chip/firmware applicability
    selector: Selector,
}

impl AddressedFragment {
    /// Creates a fragment, rejecting payloads that don't fit `kind` or that run past the end of the address space
    pub fn new(address: u32, payload: Vec<u8>, kind: PatchKind, selector: Selector) -> Result<Self> {
        if !kind.accepts(payload.len()) {
            return Err(Error::SizeMismatch {
                address,
                kind,
                len: payload.len(),
            });
        }
        // last byte must still be addressable
        let last = u32::try_from(payload.len() - 1)
            .ok()
            .and_then(|off| address.checked_add(off));
        if last.is_none() {
            return Err(Error::AddressOverflow {
                address,
                len: payload.len(),
            });
        }
        Ok(Self {
            address,
            payload,
            kind,
            selector,
        })
    }

    /// Shorthand for a [`PatchKind::RawBytes`] fragment that applies to every chip and firmware
    pub fn raw(address: u32, payload: Vec<u8>) -> Result<Self> {
        Self::new(address, payload, PatchKind::RawBytes, Selector::ALL)
    }

    /// Target address
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Integration kind
    pub fn kind(&self) -> PatchKind {
        self.kind
    }

    /// Applicability selector
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// One past the last byte this fragment writes, widened so a fragment ending at the top of memory doesn't wrap
    pub fn end(&self) -> u64 {
        self.address as u64 + self.payload.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::fragment::selector::Selector;
    use crate::fragment::{AddressedFragment, PatchKind};

    #[test]
    /// Generic values must be a natural word width
    fn test_generic_value_widths() {
        for len in [1, 2, 4] {
            assert!(AddressedFragment::new(0x100, vec![0; len], PatchKind::GenericValue, Selector::ALL).is_ok());
        }
        for len in [3, 5, 8] {
            let err = AddressedFragment::new(0x100, vec![0; len], PatchKind::GenericValue, Selector::ALL)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        }
    }

    #[test]
    /// Branch patches occupy exactly one instruction slot
    fn test_branch_widths() {
        for kind in [PatchKind::BranchPatch, PatchKind::BranchLinkPatch] {
            assert!(AddressedFragment::new(0x200, vec![0; 4], kind, Selector::ALL).is_ok());
            assert_eq!(
                AddressedFragment::new(0x200, vec![0; 2], kind, Selector::ALL)
                    .unwrap_err()
                    .kind(),
                ErrorKind::SizeMismatch
            );
        }
    }

    #[test]
    /// Every kind rejects an empty payload, hooks accept any other length
    fn test_empty_and_hook() {
        for kind in [
            PatchKind::BranchPatch,
            PatchKind::BranchLinkPatch,
            PatchKind::GenericValue,
            PatchKind::RawBytes,
            PatchKind::HookWithRegisterSave,
        ] {
            assert_eq!(
                AddressedFragment::new(0, Vec::new(), kind, Selector::ALL)
                    .unwrap_err()
                    .kind(),
                ErrorKind::SizeMismatch
            );
        }
        assert!(AddressedFragment::new(0, vec![0; 37], PatchKind::HookWithRegisterSave, Selector::ALL).is_ok());
    }

    #[test]
    /// A payload may end exactly at the top of memory but not past it
    fn test_address_overflow() {
        let top = AddressedFragment::raw(0xFFFF_FFFC, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(top.end(), 0x1_0000_0000);

        let err = AddressedFragment::raw(0xFFFF_FFFD, vec![1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AddressOverflow);
    }
}
