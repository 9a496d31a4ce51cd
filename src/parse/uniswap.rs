//! AMM liquidity operation decoding
//!
//! Decodes add/remove liquidity calls against the known router. The
//! liquidity-pool token address is derived deterministically from the
//! CREATE2 pairing function over the two underlying token addresses
//! (content-addressed, never fetched from chain); its metadata is
//! fetched from the token contract on demand and cached.
//!
//! The pool emits its mint as a regular Transfer, so an "add" takes the
//! received amount from the indexer's sub-record for the pair contract;
//! a "remove" carries the burned liquidity amount in the calldata.

use crate::error::ParseError;
use crate::parse::{
    abi, ContractRegistry, DecodedTransfer, DecoderResult, TransferDirection,
};
use crate::tokens::TokenCache;
use crate::types::RawTransaction;
use alloy_primitives::{keccak256, Address, B256};

/// Selector of `addLiquidityETH(address,uint256,uint256,uint256,address,uint256)`.
const ADD_LIQUIDITY_ETH_SELECTOR: [u8; 4] = [0xf3, 0x05, 0xd7, 0x19];

/// Selector of `removeLiquidityETHWithPermit(address,uint256,uint256,uint256,address,uint256,bool,uint8,bytes32,bytes32)`.
const REMOVE_LIQUIDITY_ETH_WITH_PERMIT_SELECTOR: [u8; 4] = [0xde, 0xd9, 0x38, 0x2a];

/// Derive the pair contract address for two tokens.
///
/// CREATE2: `keccak256(0xff ++ factory ++ keccak256(token0 ++ token1) ++ init_code_hash)[12..]`
/// with the tokens sorted ascending, as the factory deploys them.
pub fn pair_for(factory: Address, init_code_hash: B256, a: Address, b: Address) -> Address {
    let (token0, token1) = if a < b { (a, b) } else { (b, a) };

    let mut packed = Vec::with_capacity(40);
    packed.extend_from_slice(token0.as_slice());
    packed.extend_from_slice(token1.as_slice());
    let salt = keccak256(&packed);

    let mut preimage = Vec::with_capacity(85);
    preimage.push(0xff);
    preimage.extend_from_slice(factory.as_slice());
    preimage.extend_from_slice(salt.as_slice());
    preimage.extend_from_slice(init_code_hash.as_slice());

    Address::from_slice(&keccak256(&preimage)[12..])
}

/// Decode a liquidity call against the router.
pub async fn decode(
    tx: &RawTransaction,
    tracked: Address,
    registry: &ContractRegistry,
    tokens: &TokenCache,
) -> Result<DecoderResult, ParseError> {
    if tracked != tx.from {
        return Ok(DecoderResult::None);
    }

    match abi::selector(&tx.input) {
        Some(ADD_LIQUIDITY_ETH_SELECTOR) => {
            let Some(token) = abi::arg_address(&tx.input, 0) else {
                return Ok(DecoderResult::None);
            };
            let pair = pair_for(
                registry.uniswap_factory,
                registry.pair_init_code_hash,
                token,
                registry.weth,
            );

            // The minted liquidity amount only shows up as the pool's
            // Transfer sub-record; without it there is nothing to report.
            let Some(minted) = tx
                .token_transfers
                .iter()
                .find(|t| t.contract == pair && t.to == tracked)
            else {
                return Ok(DecoderResult::None);
            };

            let info = tokens
                .metadata(pair)
                .await
                .map_err(|source| ParseError::TokenMetadata {
                    contract: pair,
                    source,
                })?;

            Ok(DecoderResult::Transfers {
                legs: vec![DecodedTransfer {
                    direction: TransferDirection::Receive,
                    contract: Some(pair),
                    value: minted.value,
                    counterparty: Some(minted.from),
                    token: Some(info),
                }],
                claimed: vec![pair],
            })
        }
        Some(REMOVE_LIQUIDITY_ETH_WITH_PERMIT_SELECTOR) => {
            let (Some(token), Some(liquidity)) = (
                abi::arg_address(&tx.input, 0),
                abi::arg_u256(&tx.input, 1),
            ) else {
                return Ok(DecoderResult::None);
            };
            let pair = pair_for(
                registry.uniswap_factory,
                registry.pair_init_code_hash,
                token,
                registry.weth,
            );

            let info = tokens
                .metadata(pair)
                .await
                .map_err(|source| ParseError::TokenMetadata {
                    contract: pair,
                    source,
                })?;

            Ok(DecoderResult::Transfers {
                legs: vec![DecodedTransfer {
                    direction: TransferDirection::Send,
                    contract: Some(pair),
                    value: liquidity,
                    counterparty: Some(pair),
                    token: Some(info),
                }],
                claimed: vec![pair],
            })
        }
        _ => Ok(DecoderResult::None),
    }
}
