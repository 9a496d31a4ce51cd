//! Token transfer aggregation
//!
//! Filters the indexer's token transfer sub-records to those touching
//! the tracked address and turns them into transfer legs. Handles mint
//! (from = 0x0) and burn (to = 0x0) by leaving the counterparty as the
//! zero address. Also reads the destination of a plain `transfer`
//! calldata payload, used to widen the sync address set before the
//! indexer has annotated sub-records.

use crate::parse::{abi, DecodedTransfer, TransferDirection};
use crate::tokens::TokenInfo;
use crate::types::RawTransaction;
use alloy_primitives::Address;

/// Selector of `transfer(address,uint256)`.
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Transfer legs for the tracked address from the indexer's sub-records.
///
/// Records for contracts in `claimed` are skipped: a protocol decoder
/// already produced legs for them.
pub fn token_legs(
    tx: &RawTransaction,
    tracked: Address,
    claimed: &[Address],
) -> Vec<DecodedTransfer> {
    let mut legs = Vec::new();

    for record in &tx.token_transfers {
        if claimed.contains(&record.contract) {
            continue;
        }

        let token = TokenInfo {
            contract: record.contract,
            decimals: record.decimals,
            name: record.name.clone(),
            symbol: record.symbol.clone(),
        };

        if record.to == tracked {
            legs.push(DecodedTransfer {
                direction: TransferDirection::Receive,
                contract: Some(record.contract),
                value: record.value,
                counterparty: Some(record.from),
                token: Some(token.clone()),
            });
        }
        if record.from == tracked {
            legs.push(DecodedTransfer {
                direction: TransferDirection::Send,
                contract: Some(record.contract),
                value: record.value,
                counterparty: Some(record.to),
                token: Some(token),
            });
        }
    }

    legs
}

/// Destination of a plain token `transfer` call, if the payload is one.
pub fn transfer_destination(input: &[u8]) -> Option<Address> {
    if abi::selector(input)? != TRANSFER_SELECTOR {
        return None;
    }
    abi::arg_address(input, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::raw_tx;
    use alloy_primitives::{address, b256, U256};

    #[test]
    fn test_token_legs_filtered_to_tracked() {
        let tracked = address!("0000000000000000000000000000000000000001");
        let other = address!("0000000000000000000000000000000000000002");
        let third = address!("0000000000000000000000000000000000000003");
        let token = address!("0000000000000000000000000000000000000099");

        let mut tx = raw_tx(
            b256!("0000000000000000000000000000000000000000000000000000000000000001"),
            other,
            Some(token),
            U256::ZERO,
        );
        tx.token_transfers = vec![
            crate::types::TokenTransfer {
                contract: token,
                from: other,
                to: tracked,
                value: U256::from(10u64),
                decimals: 18,
                name: "Test".into(),
                symbol: "TST".into(),
            },
            crate::types::TokenTransfer {
                contract: token,
                from: other,
                to: third,
                value: U256::from(99u64),
                decimals: 18,
                name: "Test".into(),
                symbol: "TST".into(),
            },
        ];

        let legs = token_legs(&tx, tracked, &[]);
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].direction, TransferDirection::Receive);
        assert_eq!(legs[0].counterparty, Some(other));
        assert_eq!(legs[0].token.as_ref().unwrap().symbol, "TST");

        // Claimed contracts are skipped entirely.
        assert!(token_legs(&tx, tracked, &[token]).is_empty());
    }

    #[test]
    fn test_transfer_destination() {
        let destination = address!("0742d35cc6634c0532925a3b844bc9e7595f0beb");
        let mut input = TRANSFER_SELECTOR.to_vec();
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(destination.as_slice());
        input.extend_from_slice(&word);
        input.extend_from_slice(&U256::from(1000u64).to_be_bytes::<32>());

        assert_eq!(transfer_destination(&input), Some(destination));
        assert_eq!(transfer_destination(&[0x01, 0x02, 0x03, 0x04]), None);
        assert_eq!(transfer_destination(&[]), None);
    }
}
