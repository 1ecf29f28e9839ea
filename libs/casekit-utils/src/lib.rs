#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Small shared building blocks used across the case vault crates.

pub mod humantime_serde;
mod secret_string;

pub use secret_string::SecretString;
