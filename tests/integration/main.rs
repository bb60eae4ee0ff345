//! Integration test binary: every integration test in one binary.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod availability_flow;
mod aux_tasks;
mod generation_flow;
