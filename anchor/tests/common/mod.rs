//! Common test utilities for integration tests

#![allow(dead_code)]

pub mod anvil;
pub mod memory_ledger;
pub mod rpc_mock;

pub use anvil::TestNode;
pub use memory_ledger::{MemoryLedger, Submission, MEMORY_ENDPOINT};
pub use rpc_mock::MockRpcNode;
