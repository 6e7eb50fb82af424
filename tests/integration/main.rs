//! Integration tests for the shopdesk session client
//! These drive the real reqwest transport against a local mock backend

pub mod test_harness;

pub mod pipeline_test;
pub mod rehydration_test;
pub mod session_flow_test;
