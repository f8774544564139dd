//! This module contains the section directory scanner
//!
//! Section files are named `NN_writeram_0xAAAAAAAA.bin`: `NN` is a zero-padded two-digit ordering key and
//! `AAAAAAAA` the eight hex digit target address. Anything else in the directory is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    /// `NN_writeram_0xAAAAAAAA.bin`, capturing the sequence and the address
    static ref SECTION_NAME: Regex =
        Regex::new(r"^([0-9]{2})_writeram_0x([0-9A-Fa-f]{8})\.bin$").expect("regex compile error");
}

/// One section file found in the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// File name, which is also the sort key
    name: String,
    /// Full path of the file
    path: PathBuf,
    /// Ordering key from the name
    sequence: u8,
    /// Target address from the name
    address: u32,
}

impl Section {
    /// Builds a section from a file name, or `None` if the name doesn't follow the convention
    pub fn parse(directory: &Path, name: &str) -> Option<Self> {
        let captures = SECTION_NAME.captures(name)?;
        let sequence = captures[1].parse().ok()?;
        let address = u32::from_str_radix(&captures[2], 16).ok()?;
        Some(Self {
            name: name.to_owned(),
            path: directory.join(name),
            sequence,
            address,
        })
    }

    /// File name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Two-digit ordering key
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Target address
    pub fn address(&self) -> u32 {
        self.address
    }
}

/// Lists the section files of `directory`, sorted by file name
///
/// The fixed-width sequence prefix makes byte order of the names the intended order. It is never
/// re-sorted by address.
pub fn scan_directory(directory: &Path) -> Result<Vec<Section>> {
    let unavailable = |source| Error::DirectoryUnavailable {
        path: directory.to_owned(),
        source,
    };

    let mut sections = Vec::new();
    for entry in fs::read_dir(directory).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        let file_name = entry.file_name();
        match file_name.to_str().and_then(|name| Section::parse(directory, name)) {
            Some(section) => sections.push(section),
            None => trace!("ignoring {:?}", file_name),
        }
    }
    sections.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    debug!("{} section(s) in {}", sections.len(), directory.display());
    Ok(sections)
}
