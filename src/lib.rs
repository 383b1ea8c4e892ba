#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

/// Configuration store access and provisioning-source resolution
pub mod config;

/// `otpauth://` provisioning URI parsing into TOTP parameters
pub mod provisioning;

/// TOTP (Time-based One-Time Password) generation and verification
pub mod totp;

/// Candidate-token normalization shared by the verification entry points
pub mod normalize;

/// Engine owning one cached, refreshable parameter set per provisioning source
pub mod engine;
