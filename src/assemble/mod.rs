//! # Assemble
//!
//! This module turns ordered patch sections into one loadable command stream terminated by a launch record.
//!
//! Sections come either from a directory of `NN_writeram_0xAAAAAAAA.bin` files or from an in-memory
//! fragment set. Every input is read and validated before the first record is encoded, so a failing run
//! never yields a partial blob.

pub mod section;

use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::fragment::selector::{select, Target};
use crate::fragment::AddressedFragment;
use crate::wire::{encode, LaunchRecord};

use self::section::scan_directory;

/// Finished command stream
#[derive(Debug)]
pub struct Assembly {
    /// Encoded records, launch record included
    bytes: Vec<u8>,
    /// Number of write-memory records
    writes: usize,
    /// Non-fatal conditions met while assembling
    warnings: Vec<Error>,
}

impl Assembly {
    /// Encoded stream
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of write-memory records in the stream
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Total records in the stream, launch included
    pub fn record_count(&self) -> usize {
        self.writes + 1
    }

    /// Warnings such as [`Error::NoMatchingFragments`]
    pub fn warnings(&self) -> &[Error] {
        &self.warnings
    }
}

/// Owned state of one assembly run
pub struct Assembler {
    /// Concrete chip and firmware being packaged for
    target: Target,
    /// Stream built so far
    bytes: Vec<u8>,
    /// Write records appended so far
    writes: usize,
    /// Warnings collected so far
    warnings: Vec<Error>,
}

impl Assembler {
    /// Creates an empty assembler for `target`
    pub fn new(target: Target) -> Self {
        Self {
            target,
            bytes: Vec::new(),
            writes: 0,
            warnings: Vec::new(),
        }
    }

    /// Encodes the fragments that apply to the target, in input order, and terminates the stream
    pub fn assemble_fragments(mut self, fragments: &[AddressedFragment]) -> Assembly {
        let selected = select(fragments, &self.target);
        if selected.is_empty() {
            self.warnings.push(Error::NoMatchingFragments {
                chip: self.target.chip().to_owned(),
                firmware: self.target.firmware().to_owned(),
            });
        }
        for fragment in selected {
            self.push(fragment);
        }
        self.finish()
    }

    /// Reads every section in `directory`, in filename order, and assembles them
    ///
    /// Fails without output if the directory can't be listed or any section can't be read
    pub fn assemble_directory(self, directory: &Path) -> Result<Assembly> {
        let sections = scan_directory(directory)?;
        let fragments = sections
            .iter()
            .map(|section| {
                let payload = fs::read(section.path()).map_err(|source| Error::SectionUnreadable {
                    path: section.path().to_owned(),
                    source,
                })?;
                debug!(
                    "section {} -> {} bytes at {:#010x}",
                    section.name(),
                    payload.len(),
                    section.address()
                );
                AddressedFragment::raw(section.address(), payload)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.assemble_fragments(&fragments))
    }

    /// Appends the write records for one fragment
    fn push(&mut self, fragment: &AddressedFragment) {
        let records = encode(fragment);
        debug!(
            "{:#010x}: {} bytes in {} record(s)",
            fragment.address(),
            fragment.payload().len(),
            records.len()
        );
        for record in &records {
            record.write_into(&mut self.bytes);
        }
        self.writes += records.len();
    }

    /// Appends the launch record and hands out the stream
    fn finish(mut self) -> Assembly {
        LaunchRecord.write_into(&mut self.bytes);
        info!(
            "assembled {} write record(s) for {} ({} bytes)",
            self.writes,
            self.target,
            self.bytes.len()
        );
        Assembly {
            bytes: self.bytes,
            writes: self.writes,
            warnings: self.warnings,
        }
    }
}

/// Assembles the sections in `directory` for `target`
pub fn assemble(directory: &Path, target: &Target) -> Result<Assembly> {
    Assembler::new(target.clone()).assemble_directory(directory)
}

/// Writes `bytes` to `path` so that `path` either holds the complete blob or is left untouched
///
/// The blob goes to a temporary file next to `path` first and is renamed into place.
pub fn write_blob(path: &Path, bytes: &[u8]) -> Result<()> {
    let failure = |source| Error::WriteFailure {
        path: path.to_owned(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(parent).map_err(failure)?;
    file.write_all(bytes).map_err(failure)?;
    file.as_file().sync_all().map_err(failure)?;
    file.persist(path).map_err(|e| failure(e.error))?;

    info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Assembles `input` for `target` and writes the blob to `output`
///
/// `output` is only touched once assembly has fully succeeded: a failing run leaves an existing file
/// as it was and never creates a new one.
pub fn build(input: &Path, output: &Path, target: &Target) -> Result<Assembly> {
    let assembly = assemble(input, target)?;
    report_warnings(&assembly);
    write_blob(output, assembly.bytes())?;
    Ok(assembly)
}

/// Logs the warnings of an assembly
pub fn report_warnings(assembly: &Assembly) {
    for warning in assembly.warnings() {
        warn!("{}", warning);
    }
}
