//! Cryptographic operations for candidate generation and address derivation.
//!
//! This module provides:
//! - Candidate keypair generation from an injected CSPRNG using secp256k1
//! - Ethereum address derivation using Keccak-256
//! - Packed candidate batches for GPU submission

mod address;
mod keypair;

pub use address::{Address, ADDRESS_NIBBLES};
pub use keypair::{
    Candidate, CandidateBatch, CandidateSource, PrivateKey, PublicKeyBytes, PUBLIC_KEY_LEN,
};
