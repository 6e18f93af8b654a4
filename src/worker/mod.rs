//! Search backends.
//!
//! This module provides:
//! - Multi-threaded CPU workers driven by request/response messages
//! - The host side of the GPU batch protocol and its device implementations
//! - A one-shot stop signal shared by every unit of work

mod cpu;
pub mod emulated;
pub mod gpu;
#[cfg(feature = "gpu")]
pub mod opencl;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::crypto::{Address, PrivateKey};

pub use cpu::{CpuWorker, SearchRequest, SearchResponse};
pub use pool::{WorkerPool, WorkerReply};

/// A confirmed match: the private key and the address it derives.
#[derive(Debug)]
pub struct VanityMatch {
    pub private_key: PrivateKey,
    pub address: Address,
}

impl VanityMatch {
    /// The private key as hex (no 0x prefix).
    pub fn private_key_hex(&self) -> String {
        self.private_key.to_hex()
    }

    /// The address as lowercase hex with 0x prefix.
    pub fn address_hex(&self) -> String {
        self.address.to_hex_prefixed()
    }
}

/// Shared cancellation flag. Once tripped it stays tripped.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal. Returns true only for the call that performed the transition.
    pub fn trip(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns the underlying flag for external use (e.g., signal handlers).
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_trips_once() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!stop.is_tripped());
        assert!(other.trip());
        assert!(!stop.trip());
        assert!(stop.is_tripped());
    }

    #[test]
    fn test_external_flag_is_shared() {
        let stop = StopSignal::new();
        stop.flag().store(true, Ordering::Relaxed);
        assert!(stop.is_tripped());
        assert!(!stop.trip());
    }
}
