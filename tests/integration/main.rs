// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for mesh-verifier
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig.
//! Tests are marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_exec_echo -- --ignored
//! ```
//!
//! The tests use your existing kubeconfig (~/.kube/config or KUBECONFIG env var).
//! They do not need a service mesh; each test creates its own namespace and
//! a plain workload pod to observe and exec into.

// Shared test fixtures (used by unit, functional, and integration)
#[path = "../common/mod.rs"]
mod common;

mod namespace;


pub use cluster::*;
pub use namespace::*;
