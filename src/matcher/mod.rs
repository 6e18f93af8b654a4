//! Pattern matching for Ethereum addresses.
//!
//! A pattern fixes the leading and trailing hex nibbles of an address.
//! Both windows are compared as nibble values, so hex case never matters.

mod pattern;

pub use pattern::{Pattern, MAX_PATTERN_NIBBLES};
