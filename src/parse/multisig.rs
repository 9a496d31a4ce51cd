//! Multi-signature relay decoding
//!
//! A `submitTransaction(address destination, uint256 value, bytes data)`
//! call relays value to an inner destination. The destination is decoded
//! only to widen the address set considered for sync; the relay itself
//! produces no transfers (the actual movement shows up in the call
//! trace when the confirmation threshold executes it).
//!
//! Relay wallets are user-deployed, so this is dispatched on selector
//! alone rather than through the contract registry.

use crate::parse::abi;
use alloy_primitives::Address;

/// Selector of `submitTransaction(address,uint256,bytes)`.
const SUBMIT_TRANSACTION_SELECTOR: [u8; 4] = [0xc6, 0x42, 0x74, 0x74];

/// The inner destination of a relay submission, if the payload is one.
pub fn relay_destination(input: &[u8]) -> Option<Address> {
    if abi::selector(input)? != SUBMIT_TRANSACTION_SELECTOR {
        return None;
    }
    abi::arg_address(input, 0)
}
