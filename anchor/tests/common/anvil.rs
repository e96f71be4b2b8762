//! Local Anvil node for end-to-end testing

use alloy::{
    primitives::Address,
    signers::local::PrivateKeySigner,
};
use alloy_node_bindings::{Anvil, AnvilInstance};

/// Running Anvil node plus the account that anchors
pub struct TestNode {
    /// Anvil instance (keeps it alive)
    pub anvil: AnvilInstance,
    /// RPC URL
    pub rpc_url: String,
    /// Chain ID
    pub chain_id: u64,
    /// Signing account
    pub account: Address,
    /// Signing key (hex string with 0x prefix)
    pub private_key: String,
    /// Registry stand-in: an address without code accepts any call
    pub registry: Address,
}

impl TestNode {
    /// Spawn Anvil with instant mining
    pub fn spawn() -> anyhow::Result<Self> {
        let anvil = Anvil::new().try_spawn()?;

        let rpc_url = anvil.endpoint();
        let chain_id = anvil.chain_id();

        let key = anvil.keys()[0].clone();
        let signer = PrivateKeySigner::from(key.clone());
        let account = signer.address();
        let private_key = format!("0x{}", hex::encode(key.to_bytes()));

        Ok(Self {
            anvil,
            rpc_url,
            chain_id,
            account,
            private_key,
            registry: Address::from([0x42; 20]),
        })
    }
}
