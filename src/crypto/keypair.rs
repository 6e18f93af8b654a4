//! Candidate keypair generation.

use std::fmt;

use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use secp256k1::{PublicKey, Secp256k1, SecretKey, SignOnly};

use super::Address;
use crate::error::VanityError;
use crate::matcher::Pattern;

/// Length of an uncompressed public key without the 0x04 tag.
pub const PUBLIC_KEY_LEN: usize = 64;

/// A secp256k1 secret scalar.
///
/// Not `Clone`: a matching key has exactly one owner at a time.
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    /// Creates a private key from big-endian bytes, rejecting values outside `[1, n-1]`.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, secp256k1::Error> {
        SecretKey::from_slice(&bytes).map(Self)
    }

    /// Returns the private key bytes (big-endian).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }

    /// Returns the private key as a hex string (without 0x prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// An uncompressed public key, `x || y`, without the 0x04 tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyBytes([u8; PUBLIC_KEY_LEN]);

impl PublicKeyBytes {
    #[inline]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    fn from_point(point: &PublicKey) -> Self {
        let serialized = point.serialize_uncompressed();
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(&serialized[1..]);
        Self(bytes)
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", hex::encode(self.0))
    }
}

/// One generated private/public key pair.
#[derive(Debug)]
pub struct Candidate {
    pub private_key: PrivateKey,
    pub public_key: PublicKeyBytes,
}

impl Candidate {
    /// Derives this candidate's address.
    #[inline]
    pub fn address(&self) -> Address {
        Address::derive(&self.public_key)
    }
}

/// Produces random candidate keypairs from an injected CSPRNG.
pub struct CandidateSource<R> {
    rng: R,
    secp: Secp256k1<SignOnly>,
}

impl CandidateSource<rand::rngs::ThreadRng> {
    /// Creates a source backed by the thread-local CSPRNG.
    pub fn from_thread_rng() -> Self {
        Self::new(rand::thread_rng())
    }
}

impl<R: RngCore + CryptoRng> CandidateSource<R> {
    /// Creates a source that draws scalars from `rng`.
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            secp: Secp256k1::signing_only(),
        }
    }

    /// Draws a scalar uniformly from the valid secp256k1 range.
    ///
    /// Out-of-range draws (probability ~2^-128) are rejected and redrawn.
    fn next_secret(&mut self) -> Result<SecretKey, VanityError> {
        let mut bytes = [0u8; 32];
        loop {
            self.rng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| VanityError::EntropySourceUnavailable(e.to_string()))?;
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                return Ok(secret);
            }
        }
    }

    /// Generates one candidate keypair.
    #[inline]
    pub fn next_candidate(&mut self) -> Result<Candidate, VanityError> {
        let secret = self.next_secret()?;
        let point = PublicKey::from_secret_key(&self.secp, &secret);

        Ok(Candidate {
            private_key: PrivateKey(secret),
            public_key: PublicKeyBytes::from_point(&point),
        })
    }

    /// Generates `count` candidates for bulk submission.
    ///
    /// Scalars are drawn sequentially so a seeded source is reproducible;
    /// the point multiplications run in parallel.
    pub fn generate_batch(&mut self, count: usize) -> Result<CandidateBatch, VanityError> {
        let secrets = (0..count)
            .map(|_| self.next_secret())
            .collect::<Result<Vec<_>, _>>()?;

        let mut public_keys = vec![0u8; count * PUBLIC_KEY_LEN];
        let secp = &self.secp;
        public_keys
            .par_chunks_mut(PUBLIC_KEY_LEN)
            .zip(secrets.par_iter())
            .for_each(|(out, secret)| {
                let point = PublicKey::from_secret_key(secp, secret);
                out.copy_from_slice(&point.serialize_uncompressed()[1..]);
            });

        let private_keys = secrets.into_iter().map(PrivateKey).collect();

        Ok(CandidateBatch {
            private_keys,
            public_keys,
        })
    }

    /// Recomputes the public key of a known private key.
    pub fn public_key_of(&self, private_key: &PrivateKey) -> PublicKeyBytes {
        let point = PublicKey::from_secret_key(&self.secp, &private_key.0);
        PublicKeyBytes::from_point(&point)
    }
}

/// A batch of candidates whose public keys are packed for device upload.
pub struct CandidateBatch {
    private_keys: Vec<PrivateKey>,
    /// Concatenated 64-byte public keys, in the same order as `private_keys`.
    public_keys: Vec<u8>,
}

impl CandidateBatch {
    pub fn len(&self) -> usize {
        self.private_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.private_keys.is_empty()
    }

    /// Raw public key bytes, `64 * len()` long.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_keys
    }

    /// Returns the public key at `index`.
    pub fn public_key(&self, index: usize) -> Option<PublicKeyBytes> {
        let start = index.checked_mul(PUBLIC_KEY_LEN)?;
        let chunk = self.public_keys.get(start..start + PUBLIC_KEY_LEN)?;
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(chunk);
        Some(PublicKeyBytes(bytes))
    }

    /// Maps device-reported indices back to candidates, re-checking each on the host.
    ///
    /// Out-of-range, duplicate, and non-matching indices are dropped. Order is preserved.
    pub fn resolve(&self, indices: &[u32], pattern: &Pattern) -> Vec<(usize, Address)> {
        let mut seen = vec![false; self.len()];
        let mut verified = Vec::with_capacity(indices.len());

        for &index in indices {
            let index = index as usize;
            let Some(public_key) = self.public_key(index) else {
                continue;
            };
            if std::mem::replace(&mut seen[index], true) {
                continue;
            }
            let address = Address::derive(&public_key);
            if pattern.matches(&address) {
                verified.push((index, address));
            }
        }

        verified
    }

    /// Consumes the batch, returning the candidate at `index`.
    pub fn into_candidate(mut self, index: usize) -> Option<Candidate> {
        let public_key = self.public_key(index)?;
        let private_key = self.private_keys.swap_remove(index);
        Some(Candidate {
            private_key,
            public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            unimplemented!()
        }
        fn next_u64(&mut self) -> u64 {
            unimplemented!()
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            unimplemented!()
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy pool offline"))
        }
    }

    impl CryptoRng for FailingRng {}

    fn seeded(seed: u64) -> CandidateSource<StdRng> {
        CandidateSource::new(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_candidate_generation() {
        let mut source = CandidateSource::from_thread_rng();
        let candidate = source.next_candidate().unwrap();
        assert_eq!(candidate.private_key.to_bytes().len(), 32);
        assert_eq!(source.public_key_of(&candidate.private_key), candidate.public_key);
    }

    #[test]
    fn test_known_address() {
        let mut secret_bytes = [0u8; 32];
        secret_bytes[31] = 1;
        let private_key = PrivateKey::from_bytes(secret_bytes).unwrap();
        let source = CandidateSource::from_thread_rng();
        let address = Address::derive(&source.public_key_of(&private_key));

        // Address for private key = 1 is well-known
        assert_eq!(address.to_hex(), "7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn test_out_of_range_scalars_rejected() {
        assert!(PrivateKey::from_bytes([0u8; 32]).is_err());
        assert!(PrivateKey::from_bytes([0xff; 32]).is_err());
    }

    #[test]
    fn test_seeded_sources_agree() {
        let mut a = seeded(7);
        let mut b = seeded(7);
        for _ in 0..4 {
            let ca = a.next_candidate().unwrap();
            let cb = b.next_candidate().unwrap();
            assert_eq!(ca.private_key.to_bytes(), cb.private_key.to_bytes());
            assert_eq!(ca.address(), cb.address());
        }
    }

    #[test]
    fn test_entropy_failure_is_reported() {
        let mut source = CandidateSource::new(FailingRng);
        let err = source.next_candidate().unwrap_err();
        assert!(matches!(err, VanityError::EntropySourceUnavailable(_)));
        assert!(source.generate_batch(8).is_err());
    }

    #[test]
    fn test_batch_matches_sequential_generation() {
        let batch = seeded(11).generate_batch(5).unwrap();
        let mut sequential = seeded(11);

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.public_key_bytes().len(), 5 * PUBLIC_KEY_LEN);
        for i in 0..5 {
            let candidate = sequential.next_candidate().unwrap();
            assert_eq!(batch.public_key(i), Some(candidate.public_key));
        }
        assert_eq!(batch.public_key(5), None);
    }

    #[test]
    fn test_resolve_filters_bad_indices() {
        let batch = seeded(3).generate_batch(4).unwrap();
        let any = Pattern::empty();
        let resolved = batch.resolve(&[2, 9, 2, 0], &any);
        let indices: Vec<usize> = resolved.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![2, 0]);

        // A full-address pattern that only candidate 1 satisfies.
        let target = Address::derive(&batch.public_key(1).unwrap());
        let exact = Pattern::from_hex(&target.to_hex(), "").unwrap();
        let resolved = batch.resolve(&[0, 1, 2, 3], &exact);
        assert_eq!(resolved, vec![(1, target)]);
    }

    #[test]
    fn test_into_candidate_keeps_pairing() {
        let batch = seeded(5).generate_batch(3).unwrap();
        let expected = batch.public_key(0).unwrap();
        let source = seeded(0);
        let candidate = batch.into_candidate(0).unwrap();
        assert_eq!(candidate.public_key, expected);
        assert_eq!(source.public_key_of(&candidate.private_key), expected);
    }
}
