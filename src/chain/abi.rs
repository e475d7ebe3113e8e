//! Minimal ABI encoding for the handful of contract calls the agent makes.
//!
//! Selectors are derived from the canonical signatures at call time rather
//! than kept as opaque hex constants.

use alloy_primitives::{keccak256, Address, Bytes, U256};
use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// Word-level helpers
// ---------------------------------------------------------------------------

/// First four bytes of the keccak-256 of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Left-pad an address into a 32-byte word.
pub fn addr_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// A u64 as a 32-byte big-endian word.
pub fn uint_word(v: u64) -> [u8; 32] {
    U256::from(v).to_be_bytes::<32>()
}

pub fn bool_word(v: bool) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[31] = v as u8;
    word
}

/// ABI `bytes`: length word followed by the data right-padded to a word.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let padded_len = data.len().div_ceil(32) * 32;
    let mut out = Vec::with_capacity(32 + padded_len);
    out.extend_from_slice(&uint_word(data.len() as u64));
    out.extend_from_slice(data);
    out.resize(32 + padded_len, 0);
    out
}

fn call(signature: &str, words: &[[u8; 32]]) -> Bytes {
    let mut data = Vec::with_capacity(4 + words.len() * 32);
    data.extend_from_slice(&selector(signature));
    for word in words {
        data.extend_from_slice(word);
    }
    Bytes::from(data)
}

// ---------------------------------------------------------------------------
// Call encoders
// ---------------------------------------------------------------------------

pub fn owner_of(token_id: U256) -> Bytes {
    call("ownerOf(uint256)", &[token_id.to_be_bytes::<32>()])
}

pub fn erc20_balance_of(owner: Address) -> Bytes {
    call("balanceOf(address)", &[addr_word(owner)])
}

pub fn erc1155_balance_of(owner: Address, token_id: U256) -> Bytes {
    call(
        "balanceOf(address,uint256)",
        &[addr_word(owner), token_id.to_be_bytes::<32>()],
    )
}

pub fn is_approved_for_all(owner: Address, operator: Address) -> Bytes {
    call(
        "isApprovedForAll(address,address)",
        &[addr_word(owner), addr_word(operator)],
    )
}

pub fn set_approval_for_all(operator: Address, approved: bool) -> Bytes {
    call(
        "setApprovalForAll(address,bool)",
        &[addr_word(operator), bool_word(approved)],
    )
}

pub fn erc20_transfer(to: Address, amount: U256) -> Bytes {
    call(
        "transfer(address,uint256)",
        &[addr_word(to), amount.to_be_bytes::<32>()],
    )
}

/// The monitored token's payable buyback entry; the attached value is swapped
/// into tokens credited to the caller.
pub fn buyback() -> Bytes {
    call("buyback()", &[])
}

/// Whether `account` is allowed to call the buyback entry.
pub fn buyback_authorized(account: Address) -> Bytes {
    call("buybackAuthorized(address)", &[addr_word(account)])
}

// ---------------------------------------------------------------------------
// Return-value decoders
// ---------------------------------------------------------------------------

pub fn decode_address(ret: &[u8]) -> Result<Address> {
    let word = ret.get(..32).context("return data shorter than one word")?;
    Ok(Address::from_slice(&word[12..]))
}

pub fn decode_uint(ret: &[u8]) -> Result<U256> {
    let word = ret.get(..32).context("return data shorter than one word")?;
    Ok(U256::from_be_slice(word))
}

pub fn decode_bool(ret: &[u8]) -> Result<bool> {
    Ok(!decode_uint(ret)?.is_zero())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
