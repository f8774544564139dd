#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod assemble;
pub mod capture;
pub mod error;
pub mod fragment;
pub mod wire;

pub use error::{Error, ErrorKind, Result};
