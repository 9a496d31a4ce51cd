//! Minimal ABI readers for opaque call payloads and return data
//!
//! Decoders only ever need the selector plus a handful of static words
//! and the occasional dynamic string, so this stays a byte-slicing
//! helper rather than a full ABI machine. All readers return `None` on
//! short or malformed data; callers treat that as a decode mismatch.

use alloy_primitives::{Address, U256};

/// Length of a function selector.
pub const SELECTOR_LEN: usize = 4;

const WORD_LEN: usize = 32;

/// The four-byte function selector of a call payload.
pub fn selector(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < SELECTOR_LEN {
        return None;
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&input[..SELECTOR_LEN]);
    Some(sel)
}

/// The 32-byte word at `index` within `data` (no selector offset).
pub fn word(data: &[u8], index: usize) -> Option<&[u8]> {
    let start = index.checked_mul(WORD_LEN)?;
    let end = start.checked_add(WORD_LEN)?;
    data.get(start..end)
}

/// Address encoded in the low 20 bytes of the word at `index`.
pub fn word_address(data: &[u8], index: usize) -> Option<Address> {
    let w = word(data, index)?;
    // The 12 high bytes must be zero padding for a well-formed address.
    if w[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&w[12..]))
}

/// U256 word at `index`.
pub fn word_u256(data: &[u8], index: usize) -> Option<U256> {
    word(data, index).map(U256::from_be_slice)
}

/// Dynamic UTF-8 string whose offset word sits at `index`.
///
/// The offset is relative to the start of `data`, per ABI encoding of
/// dynamic arguments and return values.
pub fn word_string(data: &[u8], index: usize) -> Option<String> {
    let offset: usize = word_u256(data, index)?.try_into().ok()?;
    let start = offset.checked_add(WORD_LEN)?;
    let len: usize = U256::from_be_slice(data.get(offset..start)?)
        .try_into()
        .ok()?;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Argument-position variants skipping the selector.
pub fn arg_address(input: &[u8], index: usize) -> Option<Address> {
    word_address(input.get(SELECTOR_LEN..)?, index)
}

pub fn arg_u256(input: &[u8], index: usize) -> Option<U256> {
    word_u256(input.get(SELECTOR_LEN..)?, index)
}

pub fn arg_string(input: &[u8], index: usize) -> Option<String> {
    word_string(input.get(SELECTOR_LEN..)?, index)
}
