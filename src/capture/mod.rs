//! # Capture
//!
//! This module covers provenance capture: recording what every patch-table target held before the
//! firmware's own loader overwrites it.
//!
//! The [`CaptureHook`] stands in for the firmware's patch-apply routine. On its first invocation it walks
//! the patch table, snapshots every target, and only then delegates to the wrapped routine. The resulting
//! [`CaptureTable`] is read-only afterwards and answers diagnostic queries through [`reader`].

pub mod memory;
pub mod reader;

use std::sync::OnceLock;

use log::{debug, trace, warn};

use crate::error::{Error, Result};

use self::memory::TargetMemory;

/// Shape of one patch-table row for a firmware generation
///
/// A row is the target address, then `value_words` words to store there, then `trailer_words` words the
/// loader keeps for its own use. Trailer words are carried through verbatim and never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowLayout {
    /// Words written to the target address
    pub value_words: usize,
    /// Opaque words following the values
    pub trailer_words: usize,
}

impl RowLayout {
    /// Words in a full row, address included
    pub fn row_words(&self) -> usize {
        1 + self.value_words + self.trailer_words
    }
}

/// Row layout of one firmware family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Family name used to pick the profile
    pub family: &'static str,
    /// Row layout of that family's patch table
    pub layout: RowLayout,
}

/// Known firmware families. New families are added here
pub const PROFILES: &[CaptureProfile] = &[
    CaptureProfile {
        family: "single-word",
        layout: RowLayout {
            value_words: 1,
            trailer_words: 0,
        },
    },
    CaptureProfile {
        family: "double-word",
        layout: RowLayout {
            value_words: 2,
            trailer_words: 0,
        },
    },
    CaptureProfile {
        family: "quad-word",
        layout: RowLayout {
            value_words: 4,
            trailer_words: 0,
        },
    },
    CaptureProfile {
        family: "quad-word-trailer",
        layout: RowLayout {
            value_words: 4,
            trailer_words: 2,
        },
    },
];

impl CaptureProfile {
    /// Finds the profile registered for `family`
    pub fn lookup(family: &str) -> Result<&'static CaptureProfile> {
        PROFILES
            .iter()
            .find(|p| p.family.eq_ignore_ascii_case(family))
            .ok_or_else(|| Error::UnknownFamily(family.to_owned()))
    }
}

/// One row of a firmware-supplied patch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRow<'a> {
    /// Address the loader is about to overwrite
    pub target: u32,
    /// Words the loader will store at `target`
    pub values: &'a [u32],
    /// Opaque trailing words
    pub trailer: &'a [u32],
}

/// The firmware's own table of pending patches, as raw words
#[derive(Debug, Clone, Copy)]
pub struct PatchTable<'a> {
    /// Row words back to back
    words: &'a [u32],
    /// Layout of each row
    layout: RowLayout,
}

impl<'a> PatchTable<'a> {
    /// Views `words` as rows of `layout`. A trailing partial row is ignored
    pub fn new(words: &'a [u32], layout: RowLayout) -> Self {
        let extra = words.len() % layout.row_words();
        if extra != 0 {
            warn!("patch table has {} stray trailing word(s)", extra);
        }
        Self { words, layout }
    }

    /// Layout of each row
    pub fn layout(&self) -> RowLayout {
        self.layout
    }

    /// Number of full rows
    pub fn len(&self) -> usize {
        self.words.len() / self.layout.row_words()
    }

    /// Whether the table has no full rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over full rows in table order
    pub fn rows(&self) -> impl Iterator<Item = PatchRow<'a>> + 'a {
        let layout = self.layout;
        self.words.chunks_exact(layout.row_words()).map(move |row| {
            let (values, trailer) = row[1..].split_at(layout.value_words);
            PatchRow {
                target: row[0],
                values,
                trailer,
            }
        })
    }
}

/// What a target held before it was patched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Original {
    /// Pre-patch words, in address order
    Words(Vec<u32>),
    /// The target couldn't be read when capturing
    Unavailable,
}

/// Pre-patch state of one patch-table row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    /// Target address of the row
    pub address: u32,
    /// Captured words, or the unavailable marker
    pub original: Original,
    /// Opaque trailing words copied from the row
    pub trailer: Vec<u32>,
}

impl CaptureEntry {
    /// Captured words as little-endian bytes, if the capture succeeded
    pub fn original_bytes(&self) -> Option<Vec<u8>> {
        match &self.original {
            Original::Words(words) => Some(words.iter().flat_map(|w| w.to_le_bytes()).collect()),
            Original::Unavailable => None,
        }
    }
}

/// Pre-patch state of a whole patch table, one entry per row in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureTable {
    /// Entries in table order
    entries: Vec<CaptureEntry>,
}

impl CaptureTable {
    /// Snapshots every row's target. Never fails: unreadable targets get [`Original::Unavailable`]
    pub fn capture<M: TargetMemory + ?Sized>(memory: &M, table: &PatchTable<'_>) -> Self {
        let layout = table.layout();
        let entries = table
            .rows()
            .map(|row| {
                let original = match memory.read_words(row.target, layout.value_words) {
                    Ok(words) => {
                        trace!("captured {:#010x}: {:08x?}", row.target, words);
                        Original::Words(words)
                    }
                    Err(e) => {
                        warn!("capture unavailable for {:#010x}: {}", row.target, e);
                        Original::Unavailable
                    }
                };
                CaptureEntry {
                    address: row.target,
                    original,
                    trailer: row.trailer.to_vec(),
                }
            })
            .collect();
        Self { entries }
    }

    /// Entries in table order
    pub fn entries(&self) -> &[CaptureEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the bytes of `buf`, which mirrors memory starting at `start`, with captured originals
    ///
    /// Only bytes inside both `buf` and a capture window are touched; unavailable captures are skipped.
    pub fn overlay(&self, start: u32, buf: &mut [u8]) {
        let view_start = start as u64;
        let view_end = view_start + buf.len() as u64;
        for entry in &self.entries {
            let Some(original) = entry.original_bytes() else {
                continue;
            };
            let window_start = entry.address as u64;
            let window_end = window_start + original.len() as u64;

            let from = view_start.max(window_start);
            let to = view_end.min(window_end);
            if from >= to {
                continue;
            }
            let dst = (from - view_start) as usize..(to - view_start) as usize;
            let src = (from - window_start) as usize..(to - window_start) as usize;
            buf[dst].copy_from_slice(&original[src]);
        }
    }
}

/// The firmware's patch-apply routine
pub trait PatchApply {
    /// Error type the routine can report
    type Error;

    /// Commits every row of `table` to `memory`
    fn apply<M: TargetMemory + ?Sized>(
        &self,
        memory: &mut M,
        table: &PatchTable<'_>,
    ) -> std::result::Result<(), Self::Error>;
}

/// Reference patch-apply routine: stores each row's values at its target, in table order
#[derive(Debug, Default, Clone, Copy)]
pub struct TablePatcher;

impl TablePatcher {
    /// Creates a new [`TablePatcher`]
    pub fn new() -> Self {
        Self
    }
}

impl PatchApply for TablePatcher {
    type Error = Error;

    fn apply<M: TargetMemory + ?Sized>(&self, memory: &mut M, table: &PatchTable<'_>) -> Result<()> {
        for row in table.rows() {
            memory.write_words(row.target, row.values)?;
        }
        debug!("applied {} patch row(s)", table.len());
        Ok(())
    }
}

/// Wraps a patch-apply routine so that every target is captured before the routine runs
///
/// Capture happens on the first invocation only; by any later invocation the targets already hold
/// patched values.
pub struct CaptureHook<A> {
    /// Wrapped routine
    inner: A,
    /// Filled once, before the first delegation
    captured: OnceLock<CaptureTable>,
}

impl<A: PatchApply> CaptureHook<A> {
    /// Wraps `inner`
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            captured: OnceLock::new(),
        }
    }

    /// Capture table, once the hook has run
    pub fn captures(&self) -> Option<&CaptureTable> {
        self.captured.get()
    }

    /// Wrapped routine
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: PatchApply> PatchApply for CaptureHook<A> {
    type Error = A::Error;

    fn apply<M: TargetMemory + ?Sized>(
        &self,
        memory: &mut M,
        table: &PatchTable<'_>,
    ) -> std::result::Result<(), Self::Error> {
        let mut fresh = false;
        let captured = self.captured.get_or_init(|| {
            fresh = true;
            CaptureTable::capture(&*memory, table)
        });
        if fresh {
            debug!("captured {} patch-table row(s)", captured.len());
        } else {
            warn!("patch-apply entered again, keeping the first capture");
        }
        self.inner.apply(memory, table)
    }
}
