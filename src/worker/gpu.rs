//! Host side of the GPU batch matching protocol.
//!
//! The host generates candidate keys, the device hashes and matches them:
//! 1. Validate the batch before touching the device
//! 2. Pack the pattern into a fixed 84-word parameter block
//! 3. Upload parameters and raw public keys, zero the match counter
//! 4. Dispatch one invocation per key in groups of 64
//! 5. Read back the match counter (clamped) and the recorded indices
//!
//! The device itself sits behind [`ComputeDevice`], so the protocol is the
//! same for the OpenCL backend and the host emulation.

use std::fmt;

use crate::crypto::{CandidateBatch, PUBLIC_KEY_LEN};
use crate::error::VanityError;
use crate::matcher::{Pattern, MAX_PATTERN_NIBBLES};

/// Maximum number of keys per device submission.
pub const MAX_GPU_BATCH: usize = 16384;

/// Maximum number of matching indices the device records per batch.
pub const MAX_MATCHES: usize = 1024;

/// Invocations per compute group.
pub const GROUP_SIZE: usize = 64;

/// Words in the parameter block: two lengths, two reserved, 40 + 40 nibbles.
pub const PARAM_WORDS: usize = 4 + 2 * MAX_PATTERN_NIBBLES;

/// Words in the match buffer: the counter followed by the index slots.
pub const MATCH_WORDS: usize = 1 + MAX_MATCHES;

const PREFIX_OFFSET: usize = 4;
const SUFFIX_OFFSET: usize = PREFIX_OFFSET + MAX_PATTERN_NIBBLES;

/// Pattern layout shared with the kernel:
/// `[prefix_len, suffix_len, 0, 0, prefix[40], suffix[40]]`, one `u32` per field.
#[derive(Clone, PartialEq, Eq)]
pub struct ParamBlock([u32; PARAM_WORDS]);

impl ParamBlock {
    /// Packs a pattern. Unused nibble slots are zero.
    pub fn pack(pattern: &Pattern) -> Self {
        let mut words = [0u32; PARAM_WORDS];
        let prefix = &pattern.prefix()[..pattern.prefix().len().min(MAX_PATTERN_NIBBLES)];
        let suffix = &pattern.suffix()[..pattern.suffix().len().min(MAX_PATTERN_NIBBLES)];

        words[0] = prefix.len() as u32;
        words[1] = suffix.len() as u32;
        for (slot, &n) in words[PREFIX_OFFSET..].iter_mut().zip(prefix) {
            *slot = n as u32;
        }
        for (slot, &n) in words[SUFFIX_OFFSET..].iter_mut().zip(suffix) {
            *slot = n as u32;
        }

        Self(words)
    }

    /// The raw words, as uploaded.
    pub fn words(&self) -> &[u32; PARAM_WORDS] {
        &self.0
    }

    pub fn prefix_len(&self) -> usize {
        (self.0[0] as usize).min(MAX_PATTERN_NIBBLES)
    }

    pub fn suffix_len(&self) -> usize {
        (self.0[1] as usize).min(MAX_PATTERN_NIBBLES)
    }

    pub fn prefix(&self) -> &[u32] {
        &self.0[PREFIX_OFFSET..PREFIX_OFFSET + self.prefix_len()]
    }

    pub fn suffix(&self) -> &[u32] {
        &self.0[SUFFIX_OFFSET..SUFFIX_OFFSET + self.suffix_len()]
    }
}

impl fmt::Debug for ParamBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamBlock")
            .field("prefix", &self.prefix())
            .field("suffix", &self.suffix())
            .finish()
    }
}

/// Host copy of the device match buffer: `[count, index[1024]]`.
///
/// The device increments `count` for every match but only records the first
/// [`MAX_MATCHES`] indices, so `count` may exceed what was stored.
#[derive(Clone)]
pub struct MatchBuffer(Vec<u32>);

impl MatchBuffer {
    pub fn new() -> Self {
        Self(vec![0; MATCH_WORDS])
    }

    pub fn words(&self) -> &[u32] {
        &self.0
    }

    /// Destination for a device read-back.
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.0
    }

    /// The counter exactly as the device left it.
    pub fn raw_count(&self) -> u32 {
        self.0[0]
    }

    /// Number of recorded indices.
    pub fn count(&self) -> usize {
        (self.raw_count() as usize).min(MAX_MATCHES)
    }

    /// The recorded batch-local indices.
    pub fn indices(&self) -> &[u32] {
        &self.0[1..1 + self.count()]
    }
}

impl Default for MatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MatchBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchBuffer")
            .field("raw_count", &self.raw_count())
            .field("indices", &self.indices())
            .finish()
    }
}

/// Number of compute groups needed for `batch_len` keys.
#[inline]
pub fn group_count(batch_len: usize) -> usize {
    batch_len.div_ceil(GROUP_SIZE)
}

/// Checks a key count against the device limits.
pub fn check_batch_len(keys: usize) -> Result<usize, VanityError> {
    if keys == 0 {
        return Err(VanityError::InvalidBatchSize("batch is empty".into()));
    }
    if keys > MAX_GPU_BATCH {
        return Err(VanityError::InvalidBatchSize(format!(
            "{} keys exceeds the maximum of {}",
            keys, MAX_GPU_BATCH
        )));
    }
    Ok(keys)
}

/// Checks a raw key buffer and returns the number of keys in it.
pub fn validate_batch(public_keys: &[u8]) -> Result<usize, VanityError> {
    let bytes = public_keys.len();
    if bytes % PUBLIC_KEY_LEN != 0 {
        return Err(VanityError::InvalidBatchSize(format!(
            "{} bytes is not a multiple of {}",
            bytes, PUBLIC_KEY_LEN
        )));
    }
    check_batch_len(bytes / PUBLIC_KEY_LEN)
}

/// A compute device that can run the hash-and-match kernel.
///
/// Calls arrive in protocol order from a single host thread.
pub trait ComputeDevice {
    /// Human readable device name.
    fn name(&self) -> String;

    /// Writes the parameter block into the reusable parameter buffer.
    fn write_params(&mut self, params: &ParamBlock) -> Result<(), VanityError>;

    /// (Re)creates the candidate buffer for this batch and uploads the keys.
    fn upload_candidates(&mut self, public_keys: &[u8]) -> Result<(), VanityError>;

    /// Zeroes the match counter.
    fn reset_match_counter(&mut self) -> Result<(), VanityError>;

    /// Runs `groups` groups of [`GROUP_SIZE`] invocations over `batch_len` keys
    /// and waits for completion.
    fn dispatch(&mut self, batch_len: u32, groups: usize) -> Result<(), VanityError>;

    /// Copies the match buffer back to the host.
    fn read_matches(&mut self, out: &mut MatchBuffer) -> Result<(), VanityError>;

    /// Frees the per-batch candidate buffer.
    fn release_candidates(&mut self);

    /// Frees every device resource.
    fn release(&mut self);
}

/// Per-batch device state. The candidate buffer is released when the session
/// drops, whichever way the batch ends.
pub struct BatchSession<'a, D: ComputeDevice + ?Sized> {
    device: &'a mut D,
    batch_len: u32,
}

impl<'a, D: ComputeDevice + ?Sized> BatchSession<'a, D> {
    /// Uploads parameters and keys and zeroes the counter.
    pub fn open(
        device: &'a mut D,
        params: &ParamBlock,
        public_keys: &[u8],
        batch_len: usize,
    ) -> Result<Self, VanityError> {
        let mut session = Self {
            device,
            batch_len: batch_len as u32,
        };
        session.device.write_params(params)?;
        session.device.upload_candidates(public_keys)?;
        session.device.reset_match_counter()?;
        Ok(session)
    }

    /// Dispatches the kernel and reads the match buffer back.
    pub fn run(&mut self, out: &mut MatchBuffer) -> Result<(), VanityError> {
        let groups = group_count(self.batch_len as usize);
        self.device.dispatch(self.batch_len, groups)?;
        self.device.read_matches(out)
    }
}

impl<D: ComputeDevice + ?Sized> Drop for BatchSession<'_, D> {
    fn drop(&mut self) {
        self.device.release_candidates();
    }
}

/// Submits candidate batches to a compute device and collects matching indices.
///
/// Not shareable between threads while a batch is running; every call takes
/// `&mut self`.
pub struct GpuBatchMatcher<D: ComputeDevice> {
    device: D,
    /// Reused read-back buffer
    matches: MatchBuffer,
    destroyed: bool,
}

impl<D: ComputeDevice> GpuBatchMatcher<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            matches: MatchBuffer::new(),
            destroyed: false,
        }
    }

    /// Returns the device name.
    pub fn device_name(&self) -> String {
        self.device.name()
    }

    /// Tests raw concatenated 64-byte public keys against `pattern`.
    ///
    /// Returns the batch-local indices of matching keys, at most
    /// [`MAX_MATCHES`], in the order the device recorded them.
    pub fn match_keys(
        &mut self,
        public_keys: &[u8],
        pattern: &Pattern,
    ) -> Result<Vec<u32>, VanityError> {
        if self.destroyed {
            return Err(VanityError::MatcherDestroyed);
        }
        let batch_len = validate_batch(public_keys)?;
        let params = ParamBlock::pack(pattern);

        let mut session = BatchSession::open(&mut self.device, &params, public_keys, batch_len)?;
        session.run(&mut self.matches)?;
        drop(session);

        if self.matches.raw_count() as usize > MAX_MATCHES {
            log::debug!(
                "{} matches in batch, kept first {}",
                self.matches.raw_count(),
                MAX_MATCHES
            );
        }
        Ok(self.matches.indices().to_vec())
    }

    /// Tests a generated batch. See [`match_keys`](Self::match_keys).
    pub fn match_batch(
        &mut self,
        batch: &CandidateBatch,
        pattern: &Pattern,
    ) -> Result<Vec<u32>, VanityError> {
        self.match_keys(batch.public_key_bytes(), pattern)
    }

    /// Releases all device resources. Later calls fail with `MatcherDestroyed`.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.device.release();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl<D: ComputeDevice> Drop for GpuBatchMatcher<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Lists available OpenCL GPU devices.
#[cfg(feature = "gpu")]
pub fn list_devices() -> Vec<String> {
    super::opencl::list_devices()
}

/// Lists available OpenCL GPU devices (none without the `gpu` feature).
#[cfg(not(feature = "gpu"))]
pub fn list_devices() -> Vec<String> {
    Vec::new()
}
