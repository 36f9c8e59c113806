//! Integration test crate for the Agora market.
//!
//! This crate exists solely to run tests that span agora-core, agora-net and
//! agora-agent. It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
