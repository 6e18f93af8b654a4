//! Host emulation of the hash-and-match kernel.
//!
//! Runs the same packed-buffer contract as `kernels/vanity.cl`: compute groups
//! become rayon tasks, and matches are appended through an atomic counter into
//! a bounded slot array. Useful for exercising the GPU protocol on machines
//! without an OpenCL device.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;
use tiny_keccak::{Hasher, Keccak};

use crate::crypto::PUBLIC_KEY_LEN;
use crate::error::VanityError;

use super::gpu::{ComputeDevice, MatchBuffer, ParamBlock, GROUP_SIZE, MAX_MATCHES};

/// A [`ComputeDevice`] that executes on the host's thread pool.
pub struct EmulatedDevice {
    params: ParamBlock,
    candidates: Option<Vec<u8>>,
    counter: AtomicU32,
    slots: Vec<AtomicU32>,
    released: bool,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self {
            params: ParamBlock::pack(&crate::matcher::Pattern::empty()),
            candidates: None,
            counter: AtomicU32::new(0),
            slots: (0..MAX_MATCHES).map(|_| AtomicU32::new(0)).collect(),
            released: false,
        }
    }

    fn ensure_live(&self) -> Result<(), VanityError> {
        if self.released {
            return Err(VanityError::Device("emulated device released".into()));
        }
        Ok(())
    }

    /// One invocation: hash key `gid` and record it if it matches.
    fn invoke(&self, keys: &[u8], gid: usize) {
        let key = &keys[gid * PUBLIC_KEY_LEN..(gid + 1) * PUBLIC_KEY_LEN];

        let mut hasher = Keccak::v256();
        hasher.update(key);
        let mut hash = [0u8; 32];
        hasher.finalize(&mut hash);

        if block_matches(&self.params, &hash[12..]) {
            let slot = self.counter.fetch_add(1, Ordering::Relaxed) as usize;
            if slot < MAX_MATCHES {
                self.slots[slot].store(gid as u32, Ordering::Relaxed);
            }
        }
    }
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates the packed pattern against a 20-byte address, nibble by nibble.
fn block_matches(params: &ParamBlock, address: &[u8]) -> bool {
    let nibble = |i: usize| -> u32 {
        let byte = address[i / 2];
        (if i % 2 == 0 { byte >> 4 } else { byte & 0x0f }) as u32
    };

    let prefix = params.prefix();
    let suffix = params.suffix();
    let suffix_start = 40 - suffix.len();

    prefix.iter().enumerate().all(|(i, &n)| nibble(i) == n)
        && suffix
            .iter()
            .enumerate()
            .all(|(i, &n)| nibble(suffix_start + i) == n)
}

impl ComputeDevice for EmulatedDevice {
    fn name(&self) -> String {
        format!("host emulation ({} threads)", rayon::current_num_threads())
    }

    fn write_params(&mut self, params: &ParamBlock) -> Result<(), VanityError> {
        self.ensure_live()?;
        self.params = params.clone();
        Ok(())
    }

    fn upload_candidates(&mut self, public_keys: &[u8]) -> Result<(), VanityError> {
        self.ensure_live()?;
        self.candidates = Some(public_keys.to_vec());
        Ok(())
    }

    fn reset_match_counter(&mut self) -> Result<(), VanityError> {
        self.ensure_live()?;
        self.counter.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn dispatch(&mut self, batch_len: u32, groups: usize) -> Result<(), VanityError> {
        self.ensure_live()?;
        let keys = self
            .candidates
            .as_deref()
            .ok_or_else(|| VanityError::Device("no candidate buffer".into()))?;
        let batch_len = batch_len as usize;
        if keys.len() < batch_len * PUBLIC_KEY_LEN {
            return Err(VanityError::Device(format!(
                "candidate buffer holds {} bytes, batch needs {}",
                keys.len(),
                batch_len * PUBLIC_KEY_LEN
            )));
        }

        (0..groups).into_par_iter().for_each(|group| {
            let first = group * GROUP_SIZE;
            let last = (first + GROUP_SIZE).min(batch_len);
            for gid in first..last {
                self.invoke(keys, gid);
            }
        });

        Ok(())
    }

    fn read_matches(&mut self, out: &mut MatchBuffer) -> Result<(), VanityError> {
        self.ensure_live()?;
        let words = out.words_mut();
        words[0] = self.counter.load(Ordering::Relaxed);
        for (word, slot) in words[1..].iter_mut().zip(&self.slots) {
            *word = slot.load(Ordering::Relaxed);
        }
        Ok(())
    }

    fn release_candidates(&mut self) {
        self.candidates = None;
    }

    fn release(&mut self) {
        self.candidates = None;
        self.slots = Vec::new();
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Address, PublicKeyBytes};
    use crate::matcher::Pattern;
    use crate::worker::gpu::GpuBatchMatcher;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::collections::HashSet;

    fn random_keys(count: usize, seed: u64) -> Vec<u8> {
        let mut keys = vec![0u8; count * PUBLIC_KEY_LEN];
        StdRng::seed_from_u64(seed).fill_bytes(&mut keys);
        keys
    }

    fn cpu_indices(keys: &[u8], pattern: &Pattern) -> HashSet<u32> {
        keys.chunks_exact(PUBLIC_KEY_LEN)
            .enumerate()
            .filter(|(_, key)| {
                let bytes: [u8; PUBLIC_KEY_LEN] = (*key).try_into().unwrap();
                pattern.matches(&Address::derive(&PublicKeyBytes::from_bytes(bytes)))
            })
            .map(|(i, _)| i as u32)
            .collect()
    }

    #[test]
    fn test_match_cap_enforced() {
        let keys = random_keys(2000, 1);
        let mut matcher = GpuBatchMatcher::new(EmulatedDevice::new());

        let indices = matcher.match_keys(&keys, &Pattern::empty()).unwrap();

        assert_eq!(indices.len(), MAX_MATCHES);
        let distinct: HashSet<u32> = indices.iter().copied().collect();
        assert_eq!(distinct.len(), MAX_MATCHES);
        assert!(indices.iter().all(|&i| i < 2000));
    }

    #[test]
    fn test_raw_counter_counts_dropped_matches() {
        let keys = random_keys(1500, 2);
        let mut device = EmulatedDevice::new();
        device.write_params(&ParamBlock::pack(&Pattern::empty())).unwrap();
        device.upload_candidates(&keys).unwrap();
        device.reset_match_counter().unwrap();
        device.dispatch(1500, 24).unwrap();

        let mut out = MatchBuffer::new();
        device.read_matches(&mut out).unwrap();
        assert_eq!(out.raw_count(), 1500);
        assert_eq!(out.count(), MAX_MATCHES);
    }

    #[test]
    fn test_agrees_with_cpu_predicate() {
        let keys = random_keys(4096, 3);
        let mut matcher = GpuBatchMatcher::new(EmulatedDevice::new());

        for (prefix, suffix) in [("a", ""), ("", "7"), ("c", "0"), ("12", "")] {
            let pattern = Pattern::from_hex(prefix, suffix).unwrap();
            let gpu: HashSet<u32> = matcher
                .match_keys(&keys, &pattern)
                .unwrap()
                .into_iter()
                .collect();
            assert_eq!(gpu, cpu_indices(&keys, &pattern), "pattern {}", pattern);
        }
    }

    #[test]
    fn test_partial_last_group() {
        let keys = random_keys(65, 4);
        let mut matcher = GpuBatchMatcher::new(EmulatedDevice::new());
        let mut indices = matcher.match_keys(&keys, &Pattern::empty()).unwrap();
        indices.sort_unstable();
        assert_eq!(indices, (0..65).collect::<Vec<u32>>());
    }

    #[test]
    fn test_released_device_fails() {
        let mut device = EmulatedDevice::new();
        device.release();
        assert!(matches!(
            device.write_params(&ParamBlock::pack(&Pattern::empty())),
            Err(VanityError::Device(_))
        ));
    }
}
