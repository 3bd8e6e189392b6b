//! Koekalenteri Integration Tests
//!
//! These tests run against a deployed API (set the KOEKALENTERI_API_URL
//! environment variable, `.env` is read too). Tests that need an existing
//! event seed it into the table named by EVENT_TABLE_NAME and are skipped
//! without it.
//!
//! Run with: cargo test --package koekalenteri-integration-tests

pub mod client;
pub mod fixtures;

pub use client::KoekalenteriClient;
pub use fixtures::*;
