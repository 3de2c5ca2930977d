//! manifest-tail manifest handling: sanitizing filters applied before persistence and the
//! minimal structural diff used for reporting.

#![forbid(unsafe_code)]

pub mod diff;
pub mod filter;

pub use diff::{minimal_difference, MinimalDiff};
pub use filter::{Filter, FilterChain, REDACTED_VALUE};
