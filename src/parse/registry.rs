//! Known protocol contract registry
//!
//! Maps contract addresses to the protocol decoder responsible for
//! them. Dispatch is contract-address first, then selector within the
//! matched protocol; selector sets are disjoint per contract, so at
//! most one sub-decoder matches a transaction. The multi-signature
//! relay is selector-only (relay wallets are user-deployed, so there is
//! no fixed address to key on).

use alloy_primitives::{address, b256, Address, B256};
use std::collections::HashMap;

/// Protocols with a dedicated sub-decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// AMM router handling liquidity add/remove
    UniswapV2Router,
    /// Wrapped-native-asset contract (deposit / withdraw)
    Weth,
    /// Cross-chain swap router (deposit / transferOut with memo)
    ThorchainRouter,
    /// DEX aggregator proxy (trade classification without selectors)
    ZrxProxy,
}

/// Registry of known protocol contracts for one chain.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    protocols: HashMap<Address, Protocol>,
    /// Wrapped-native-asset contract address
    pub weth: Address,
    /// AMM factory used for deterministic pair derivation
    pub uniswap_factory: Address,
    /// AMM pair contract init code hash (CREATE2 ingredient)
    pub pair_init_code_hash: B256,
}

impl ContractRegistry {
    /// Ethereum mainnet contract set.
    pub fn mainnet() -> Self {
        let weth = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        let uniswap_router = address!("7a250d5630b4cf539739df2c5dacb4c659f2488d");
        let thorchain_router = address!("d37bbe5744d730a1d98d8dc97c42f0ca46ad7146");
        let zrx_proxy = address!("def1c0ded9bec7f1a1670819833240f027b25eff");

        let mut protocols = HashMap::new();
        protocols.insert(weth, Protocol::Weth);
        protocols.insert(uniswap_router, Protocol::UniswapV2Router);
        protocols.insert(thorchain_router, Protocol::ThorchainRouter);
        protocols.insert(zrx_proxy, Protocol::ZrxProxy);

        Self {
            protocols,
            weth,
            uniswap_factory: address!("5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f"),
            pair_init_code_hash: b256!(
                "96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f"
            ),
        }
    }

    /// Empty registry for tests; contracts are added with [`Self::with_protocol`].
    pub fn bare(weth: Address, uniswap_factory: Address, pair_init_code_hash: B256) -> Self {
        Self {
            protocols: HashMap::new(),
            weth,
            uniswap_factory,
            pair_init_code_hash,
        }
    }

    /// Register a contract under a protocol.
    pub fn with_protocol(mut self, contract: Address, protocol: Protocol) -> Self {
        self.protocols.insert(contract, protocol);
        self
    }

    /// Protocol owning the given contract address, if any.
    pub fn protocol_for(&self, contract: Address) -> Option<Protocol> {
        self.protocols.get(&contract).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_dispatch() {
        let registry = ContractRegistry::mainnet();
        assert_eq!(registry.protocol_for(registry.weth), Some(Protocol::Weth));
        assert_eq!(
            registry.protocol_for(address!("7a250d5630b4cf539739df2c5dacb4c659f2488d")),
            Some(Protocol::UniswapV2Router)
        );
        assert_eq!(
            registry.protocol_for(address!("0000000000000000000000000000000000000001")),
            None
        );
    }
}
