//! # vanity_search
//!
//! Parallel Ethereum vanity address search on CPU threads or an OpenCL GPU.
//!
//! ## Architecture
//!
//! - `crypto`: Candidate key generation and address derivation
//! - `matcher`: Nibble prefix/suffix patterns
//! - `worker`: CPU worker pool and GPU batch matcher
//! - `search`: Drives a backend until the first confirmed match
//! - `config`: Command-line configuration

pub mod config;
pub mod crypto;
pub mod error;
pub mod matcher;
pub mod search;
pub mod worker;

pub use config::Config;
pub use crypto::{Address, Candidate, CandidateBatch, CandidateSource, PrivateKey};
pub use error::VanityError;
pub use matcher::Pattern;
pub use search::{Backend, SearchOrchestrator, SearchReport};
pub use worker::gpu::{ComputeDevice, GpuBatchMatcher};
pub use worker::{StopSignal, VanityMatch, WorkerPool};

#[cfg(feature = "gpu")]
pub use worker::opencl::OpenClDevice;
