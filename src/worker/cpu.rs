//! CPU-based worker for vanity address generation.

use std::sync::Arc;

use rand::{CryptoRng, RngCore};

use crate::crypto::CandidateSource;
use crate::error::VanityError;
use crate::matcher::Pattern;

use super::VanityMatch;

/// One unit of CPU work: test up to `batch_size` fresh candidates.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub request_id: u64,
    pub batch_size: usize,
    pub pattern: Arc<Pattern>,
}

/// Reply to a [`SearchRequest`].
#[derive(Debug)]
pub struct SearchResponse {
    pub request_id: u64,
    pub worker_id: usize,
    /// Candidates tested, including the matching one
    pub examined: u64,
    pub found: Option<VanityMatch>,
}

impl SearchResponse {
    /// Reply for a request that was skipped because the search already stopped.
    pub(crate) fn skipped(request_id: u64, worker_id: usize) -> Self {
        Self {
            request_id,
            worker_id,
            examined: 0,
            found: None,
        }
    }
}

/// A CPU worker that generates and tests keypairs.
pub struct CpuWorker<R> {
    /// Worker ID
    id: usize,
    /// Private candidate source
    source: CandidateSource<R>,
}

impl<R: RngCore + CryptoRng> CpuWorker<R> {
    /// Creates a new CPU worker.
    pub fn new(id: usize, source: CandidateSource<R>) -> Self {
        Self { id, source }
    }

    /// Runs one batch.
    ///
    /// Stops at the first candidate whose address matches and reports it,
    /// otherwise reports `batch_size` candidates examined and no match.
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse, VanityError> {
        let pattern = request.pattern.as_ref();

        for i in 0..request.batch_size {
            let candidate = self.source.next_candidate()?;
            let address = candidate.address();

            if pattern.matches(&address) {
                return Ok(SearchResponse {
                    request_id: request.request_id,
                    worker_id: self.id,
                    examined: i as u64 + 1,
                    found: Some(VanityMatch {
                        private_key: candidate.private_key,
                        address,
                    }),
                });
            }
        }

        Ok(SearchResponse {
            request_id: request.request_id,
            worker_id: self.id,
            examined: request.batch_size as u64,
            found: None,
        })
    }

    /// Returns the worker ID.
    pub fn id(&self) -> usize {
        self.id
    }
}
