//! This module contains the chip/firmware version selector and fragment selection

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};

use crate::error::{Error, Result};

use super::AddressedFragment;

/// Textual form of the wildcard
const WILDCARD: &str = "ALL";

/// One field of a selector: either a wildcard or one concrete version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionMatch {
    /// Matches any concrete version
    All,
    /// Matches exactly one version, case included
    Only(String),
}

impl VersionMatch {
    /// Checks a concrete version against this field
    pub fn matches(&self, concrete: &str) -> bool {
        match self {
            VersionMatch::All => true,
            VersionMatch::Only(v) => v == concrete,
        }
    }
}

impl FromStr for VersionMatch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case(WILDCARD) {
            Ok(VersionMatch::All)
        } else {
            normalize(s).map(VersionMatch::Only)
        }
    }
}

impl fmt::Display for VersionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionMatch::All => f.write_str(WILDCARD),
            VersionMatch::Only(v) => f.write_str(v),
        }
    }
}

/// Validates a concrete version, rejecting empty names, whitespace and the wildcard itself
///
/// Concrete versions compare exactly, case included. Only the wildcard is matched regardless of case.
fn normalize(s: &str) -> Result<String> {
    if s.is_empty() || s.chars().any(char::is_whitespace) || s.eq_ignore_ascii_case(WILDCARD) {
        return Err(Error::InvalidVersion(s.to_owned()));
    }
    Ok(s.to_owned())
}

/// Chip/firmware applicability of a fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    /// Chip revision field
    pub chip: VersionMatch,
    /// Firmware build field
    pub firmware: VersionMatch,
}

impl Selector {
    /// Selector that applies everywhere
    pub const ALL: Selector = Selector {
        chip: VersionMatch::All,
        firmware: VersionMatch::All,
    };

    /// Creates a selector from its two fields
    pub fn new(chip: VersionMatch, firmware: VersionMatch) -> Self {
        Self { chip, firmware }
    }

    /// Both fields must match at once; a wildcard in one field doesn't relax the other
    pub fn matches(&self, target: &Target) -> bool {
        self.chip.matches(&target.chip) && self.firmware.matches(&target.firmware)
    }
}

/// Concrete chip and firmware a package is built for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Concrete chip revision
    chip: String,
    /// Concrete firmware build
    firmware: String,
}

impl Target {
    /// Creates a target. Neither field may be the wildcard
    pub fn new(chip: &str, firmware: &str) -> Result<Self> {
        Ok(Self {
            chip: normalize(chip)?,
            firmware: normalize(firmware)?,
        })
    }

    /// Chip revision
    pub fn chip(&self) -> &str {
        &self.chip
    }

    /// Firmware build
    pub fn firmware(&self) -> &str {
        &self.firmware
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chip, self.firmware)
    }
}

/// Resolves the fragments that apply to `target`
///
/// Fragments keep their input order. When several matching fragments share a start address the
/// last one declared wins and the earlier ones are dropped, mirroring link-time symbol override.
/// An empty result is valid and only logged.
pub fn select<'a>(fragments: &'a [AddressedFragment], target: &Target) -> Vec<&'a AddressedFragment> {
    let matching: Vec<(usize, &AddressedFragment)> = fragments
        .iter()
        .enumerate()
        .filter(|(_, f)| f.selector().matches(target))
        .collect();

    let mut winner: HashMap<u32, usize> = HashMap::with_capacity(matching.len());
    for (index, fragment) in &matching {
        if let Some(previous) = winner.insert(fragment.address(), *index) {
            info!(
                "fragment #{} at {:#010x} overrides fragment #{} for {}",
                index,
                fragment.address(),
                previous,
                target
            );
        }
    }

    let selected: Vec<_> = matching
        .into_iter()
        .filter(|(index, f)| winner.get(&f.address()) == Some(index))
        .map(|(_, f)| f)
        .collect();

    if selected.is_empty() {
        warn!("no fragments match {}", target);
    }
    selected
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::error::ErrorKind;
    use crate::fragment::selector::{select, Selector, Target, VersionMatch};
    use crate::fragment::{AddressedFragment, PatchKind};

    /// Builds a one-word fragment for `chip`/`firmware` selectors written as strings
    fn word(address: u32, value: u8, chip: &str, firmware: &str) -> AddressedFragment {
        let selector = Selector::new(chip.parse().unwrap(), firmware.parse().unwrap());
        AddressedFragment::new(address, vec![value; 4], PatchKind::GenericValue, selector).unwrap()
    }

    #[test]
    /// Wildcards match anything, concrete fields need exact equality on both fields
    fn test_matches() {
        let target = Target::new("bcm4358", "7_112_201").unwrap();

        assert!(Selector::ALL.matches(&target));
        assert!(Selector::new(VersionMatch::All, "7_112_201".parse().unwrap()).matches(&target));
        assert!(Selector::new("bcm4358".parse().unwrap(), VersionMatch::All).matches(&target));
        assert!(!Selector::new("bcm4339".parse().unwrap(), VersionMatch::All).matches(&target));
        assert!(!Selector::new("bcm4358".parse().unwrap(), "6_37_34".parse().unwrap()).matches(&target));
    }

    #[test]
    /// Concrete versions compare case-sensitively, the wildcard does not
    fn test_case_sensitive() {
        let target = Target::new("bcm4358", "7_112_201").unwrap();
        assert!(!Selector::new("BCM4358".parse().unwrap(), VersionMatch::All).matches(&target));
        assert!(!Selector::new(VersionMatch::All, "7_112_201A".parse().unwrap()).matches(&target));
        assert_eq!(Target::new("BCM4358", "x").unwrap().chip(), "BCM4358");
        for wildcard in ["ALL", "all", "All"] {
            assert!(Selector::new(wildcard.parse().unwrap(), wildcard.parse().unwrap()).matches(&target));
        }
    }

    #[test]
    /// The wildcard is a selector value, never a target
    fn test_target_rejects_wildcard() {
        assert_eq!(Target::new("all", "x").unwrap_err().kind(), ErrorKind::InvalidVersion);
        assert_eq!(Target::new("x", "").unwrap_err().kind(), ErrorKind::InvalidVersion);
        assert_eq!("ALL".parse::<VersionMatch>().unwrap(), VersionMatch::All);
    }

    #[test]
    /// Later-declared fragments at the same address supersede earlier ones, others keep their order
    fn test_later_wins() {
        let target = Target::new("c0", "f0").unwrap();
        let fragments = vec![
            word(0x10, 1, "ALL", "ALL"),
            word(0x20, 2, "c0", "ALL"),
            word(0x10, 3, "c0", "f0"),
            word(0x10, 4, "c1", "f0"),
        ];

        let selected = select(&fragments, &target);
        let picked: Vec<_> = selected.iter().map(|f| (f.address(), f.payload()[0])).collect();
        assert_eq!(picked, [(0x20, 2), (0x10, 3)]);
    }

    #[test]
    /// Selecting nothing is not an error
    fn test_empty_selection() {
        let target = Target::new("c9", "f9").unwrap();
        let fragments = vec![word(0x10, 1, "c0", "ALL")];
        assert!(select(&fragments, &target).is_empty());
    }

    proptest! {
        #[test]
        /// Whatever the declaration order, the fragment declared last at an address is the one selected
        fn prop_last_writer_wins(order in Just((0u8..6).collect::<Vec<_>>()).prop_shuffle()) {
            let target = Target::new("c0", "f0").unwrap();
            // three fragments share 0x100, the rest get their own address
            let fragments: Vec<_> = order
                .iter()
                .map(|&v| word(if v < 3 { 0x100 } else { 0x200 + v as u32 * 4 }, v, "ALL", "ALL"))
                .collect();

            let selected = select(&fragments, &target);
            let expected_last = *order.iter().rev().find(|&&v| v < 3).unwrap();

            prop_assert_eq!(selected.len(), 4);
            let shared: Vec<_> = selected.iter().filter(|f| f.address() == 0x100).collect();
            prop_assert_eq!(shared.len(), 1);
            prop_assert_eq!(shared[0].payload()[0], expected_last);
        }
    }
}
