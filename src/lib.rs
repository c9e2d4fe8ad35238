//! blame-court library crate
//!
//! Attributes responsibility for an incident among recent commit authors and
//! writes tone-leveled blame messages for the top suspect. The binary is a
//! thin CLI over [`court::Court`]; services embed the same types directly.

pub mod analyzer;
pub mod composer;
pub mod config;
pub mod court;
pub mod error;
pub mod judgment;
pub mod keyring;
pub mod llm;
pub mod source;
pub mod store;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use court::{CaseReport, Court};
pub use error::{CourtError, Result};
