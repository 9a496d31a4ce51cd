//! DEX aggregator proxy trade classification
//!
//! Any transaction to the aggregator proxy carrying more than one token
//! transfer is a trade; the proxy's fill functions are too numerous to
//! decode selector by selector, and the token sub-records already carry
//! the legs. The trade's sides are the tracked address's aggregated
//! send and receive totals. A transaction whose sides cannot both be
//! derived falls through to plain transfer aggregation.

use crate::parse::{token_asset, DecoderResult, Trade, NATIVE_ASSET};
use crate::types::RawTransaction;
use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;

const DEX_NAME: &str = "zrx";

/// Classify a call to the aggregator proxy.
pub fn decode(tx: &RawTransaction, tracked: Address) -> DecoderResult {
    if tx.token_transfers.len() <= 1 {
        return DecoderResult::None;
    }

    // Aggregate the tracked address's token legs per (contract, side).
    let mut sold: BTreeMap<Address, U256> = BTreeMap::new();
    let mut bought: BTreeMap<Address, U256> = BTreeMap::new();
    for record in &tx.token_transfers {
        if record.from == tracked {
            let entry = sold.entry(record.contract).or_default();
            *entry = entry.saturating_add(record.value);
        }
        if record.to == tracked {
            let entry = bought.entry(record.contract).or_default();
            *entry = entry.saturating_add(record.value);
        }
    }

    // Native value sent to the proxy is either the sell side of an
    // ETH-for-token fill or, alongside a token sell, the protocol fee.
    let native_sent = if tracked == tx.from { tx.value } else { U256::ZERO };

    let (sell, fee_amount) = match (sold.len(), native_sent > U256::ZERO) {
        (1, _) => {
            let (contract, amount) = sold.iter().next().expect("len checked");
            (Some((token_asset(*contract), *amount)), native_sent)
        }
        (0, true) => (Some((NATIVE_ASSET.to_string(), native_sent)), U256::ZERO),
        _ => (None, U256::ZERO),
    };
    let buy = match bought.len() {
        1 => {
            let (contract, amount) = bought.iter().next().expect("len checked");
            Some((token_asset(*contract), *amount))
        }
        _ => None,
    };

    let (Some((sell_asset, sell_amount)), Some((buy_asset, buy_amount))) = (sell, buy) else {
        return DecoderResult::None;
    };

    DecoderResult::Trade(Trade {
        dex_name: DEX_NAME.to_string(),
        buy_asset,
        buy_amount,
        sell_asset,
        sell_amount,
        fee_asset: NATIVE_ASSET.to_string(),
        fee_amount,
        memo: None,
        liquidity_fee: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::raw_tx;
    use crate::types::TokenTransfer;
    use alloy_primitives::{address, b256};

    fn tt(contract: Address, from: Address, to: Address, value: u64) -> TokenTransfer {
        TokenTransfer {
            contract,
            from,
            to,
            value: U256::from(value),
            decimals: 18,
            name: String::new(),
            symbol: String::new(),
        }
    }

    #[test]
    fn test_two_sided_fill_is_a_trade() {
        let tracked = address!("0000000000000000000000000000000000000001");
        let pool = address!("0000000000000000000000000000000000000002");
        let sell_token = address!("0000000000000000000000000000000000000098");
        let buy_token = address!("0000000000000000000000000000000000000099");

        let mut tx = raw_tx(
            b256!("0000000000000000000000000000000000000000000000000000000000000001"),
            tracked,
            Some(address!("def1c0ded9bec7f1a1670819833240f027b25eff")),
            U256::ZERO,
        );
        tx.token_transfers = vec![
            tt(sell_token, tracked, pool, 100),
            tt(buy_token, pool, tracked, 250),
        ];

        match decode(&tx, tracked) {
            DecoderResult::Trade(trade) => {
                assert_eq!(trade.dex_name, "zrx");
                assert_eq!(trade.sell_asset, token_asset(sell_token));
                assert_eq!(trade.sell_amount, U256::from(100u64));
                assert_eq!(trade.buy_asset, token_asset(buy_token));
                assert_eq!(trade.buy_amount, U256::from(250u64));
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_native_sell_side() {
        let tracked = address!("0000000000000000000000000000000000000001");
        let pool = address!("0000000000000000000000000000000000000002");
        let buy_token = address!("0000000000000000000000000000000000000099");

        let mut tx = raw_tx(
            b256!("0000000000000000000000000000000000000000000000000000000000000002"),
            tracked,
            Some(address!("def1c0ded9bec7f1a1670819833240f027b25eff")),
            U256::from(5_000u64),
        );
        tx.token_transfers = vec![
            tt(buy_token, pool, tracked, 100),
            tt(buy_token, pool, tracked, 150),
        ];

        match decode(&tx, tracked) {
            DecoderResult::Trade(trade) => {
                assert_eq!(trade.sell_asset, NATIVE_ASSET);
                assert_eq!(trade.sell_amount, U256::from(5_000u64));
                assert_eq!(trade.buy_amount, U256::from(250u64));
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_single_transfer_is_not_a_trade() {
        let tracked = address!("0000000000000000000000000000000000000001");
        let pool = address!("0000000000000000000000000000000000000002");
        let token = address!("0000000000000000000000000000000000000099");

        let mut tx = raw_tx(
            b256!("0000000000000000000000000000000000000000000000000000000000000003"),
            tracked,
            Some(address!("def1c0ded9bec7f1a1670819833240f027b25eff")),
            U256::ZERO,
        );
        tx.token_transfers = vec![tt(token, tracked, pool, 100)];

        assert_eq!(decode(&tx, tracked), DecoderResult::None);
    }

    #[test]
    fn test_observer_without_both_sides_falls_through() {
        // Tracked address only receives; no sell side can be derived.
        let tracked = address!("0000000000000000000000000000000000000001");
        let sender = address!("0000000000000000000000000000000000000003");
        let pool = address!("0000000000000000000000000000000000000002");
        let a = address!("0000000000000000000000000000000000000098");
        let b = address!("0000000000000000000000000000000000000099");

        let mut tx = raw_tx(
            b256!("0000000000000000000000000000000000000000000000000000000000000004"),
            sender,
            Some(address!("def1c0ded9bec7f1a1670819833240f027b25eff")),
            U256::ZERO,
        );
        tx.token_transfers = vec![tt(a, sender, pool, 100), tt(b, pool, tracked, 50)];

        assert_eq!(decode(&tx, tracked), DecoderResult::None);
    }
}
