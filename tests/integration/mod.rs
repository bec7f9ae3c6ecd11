//! Integration tests for Retrace
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod bundle_cli;
pub mod capture_flow;
pub mod replay_scenarios;
