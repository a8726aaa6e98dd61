//! Core types, traits, and the error taxonomy shared by polywatch agents.
//!
//! This crate is store- and transport-agnostic: the indexing agent supplies
//! the durable store, the chain crates supply concrete upstream clients.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use primitive_types::H256;

pub use client::*;
pub use error::*;
pub use types::*;
pub use worker::*;

mod client;
mod error;
/// Multi-endpoint upstream plumbing: fallback priorities and circuit breaking.
pub mod rpc_clients;
mod types;
mod worker;

/// Render a hash as a `0x`-prefixed lowercase hex string, the storage format.
pub fn h256_to_hex(hash: &H256) -> String {
    format!("{:?}", hash)
}

/// Parse a hex string (with or without `0x` prefix) into a hash.
pub fn hex_to_h256(s: &str) -> Option<H256> {
    use std::str::FromStr;
    H256::from_str(s.trim_start_matches("0x")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = H256::from_low_u64_be(0xdeadbeef);
        let s = h256_to_hex(&h);
        assert!(s.starts_with("0x"));
        assert_eq!(hex_to_h256(&s), Some(h));
        assert_eq!(hex_to_h256(s.trim_start_matches("0x")), Some(h));
        assert_eq!(hex_to_h256("nonsense"), None);
    }
}
