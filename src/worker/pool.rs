//! Worker pool management.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use rand::{CryptoRng, RngCore};

use crate::crypto::CandidateSource;
use crate::error::VanityError;

use super::cpu::{CpuWorker, SearchRequest, SearchResponse};
use super::StopSignal;

/// What a worker sends back for each request.
pub type WorkerReply = Result<SearchResponse, VanityError>;

/// A pool of CPU worker threads serving [`SearchRequest`]s.
///
/// Workers share nothing but the request/reply channels and the stop signal.
pub struct WorkerPool {
    /// Number of workers
    num_workers: usize,
    /// Worker thread handles (Option to allow taking during join)
    handles: Option<Vec<JoinHandle<()>>>,
    /// Request queue; dropping it lets idle workers exit
    request_tx: Option<Sender<SearchRequest>>,
    /// Replies in completion order
    reply_rx: Receiver<WorkerReply>,
}

impl WorkerPool {
    /// Creates a pool whose workers draw from their thread-local CSPRNG.
    pub fn new(num_workers: usize, stop: StopSignal) -> Result<Self, VanityError> {
        Self::with_sources(num_workers, stop, |_| CandidateSource::from_thread_rng())
    }

    /// Creates a pool, building each worker's candidate source on its own thread.
    pub fn with_sources<R, F>(
        num_workers: usize,
        stop: StopSignal,
        make_source: F,
    ) -> Result<Self, VanityError>
    where
        R: RngCore + CryptoRng + 'static,
        F: Fn(usize) -> CandidateSource<R> + Send + Sync + 'static,
    {
        let num_workers = num_workers.max(1);
        let (request_tx, request_rx) = bounded(num_workers);
        let (reply_tx, reply_rx) = unbounded();

        let handles = Self::spawn_workers(
            num_workers,
            request_rx,
            reply_tx,
            stop,
            Arc::new(make_source),
        )?;

        Ok(Self {
            num_workers,
            handles: Some(handles),
            request_tx: Some(request_tx),
            reply_rx,
        })
    }

    /// Spawns worker threads.
    fn spawn_workers<R, F>(
        num_workers: usize,
        request_rx: Receiver<SearchRequest>,
        reply_tx: Sender<WorkerReply>,
        stop: StopSignal,
        make_source: Arc<F>,
    ) -> Result<Vec<JoinHandle<()>>, VanityError>
    where
        R: RngCore + CryptoRng + 'static,
        F: Fn(usize) -> CandidateSource<R> + Send + Sync + 'static,
    {
        (0..num_workers)
            .map(|id| {
                let request_rx = request_rx.clone();
                let reply_tx = reply_tx.clone();
                let stop = stop.clone();
                let make_source = make_source.clone();

                thread::Builder::new()
                    .name(format!("vanity-worker-{}", id))
                    .spawn(move || {
                        let mut worker = CpuWorker::new(id, (*make_source)(id));
                        Self::serve(&mut worker, &request_rx, &reply_tx, &stop);
                    })
                    .map_err(VanityError::Spawn)
            })
            .collect()
    }

    /// Worker loop: one reply per request until the queue closes.
    fn serve<R: RngCore + CryptoRng>(
        worker: &mut CpuWorker<R>,
        request_rx: &Receiver<SearchRequest>,
        reply_tx: &Sender<WorkerReply>,
        stop: &StopSignal,
    ) {
        for request in request_rx.iter() {
            let reply = if stop.is_tripped() {
                Ok(SearchResponse::skipped(request.request_id, worker.id()))
            } else {
                worker.search(&request)
            };

            let fatal = reply.is_err();
            if let Err(e) = &reply {
                log::error!("worker {} failed: {}", worker.id(), e);
            }
            // Receiver gone means the search is over
            if reply_tx.send(reply).is_err() || fatal {
                break;
            }
        }
    }

    /// Queues a request for the next free worker.
    pub fn dispatch(&self, request: SearchRequest) -> Result<(), VanityError> {
        let tx = self
            .request_tx
            .as_ref()
            .ok_or(VanityError::WorkersDisconnected)?;
        tx.send(request).map_err(|_| VanityError::WorkersDisconnected)
    }

    /// Waits for the next reply. Returns `Ok(None)` if the timeout expires.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerReply>, VanityError> {
        match self.reply_rx.recv_timeout(timeout) {
            Ok(reply) => Ok(Some(reply)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(VanityError::WorkersDisconnected),
        }
    }

    /// Returns the number of workers.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Closes the request queue and waits for all workers to finish their current batch.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.request_tx.take();
        if let Some(handles) = self.handles.take() {
            for handle in handles {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Pattern;

    const WAIT: Duration = Duration::from_secs(30);

    fn request(request_id: u64, batch_size: usize, pattern: &Arc<Pattern>) -> SearchRequest {
        SearchRequest {
            request_id,
            batch_size,
            pattern: pattern.clone(),
        }
    }

    #[test]
    fn test_every_request_gets_one_reply() {
        let pool = WorkerPool::new(3, StopSignal::new()).unwrap();
        let unreachable = Arc::new(Pattern::from_hex(&"0".repeat(40), "").unwrap());

        for id in 0..6 {
            pool.dispatch(request(id, 10, &unreachable)).unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..6 {
            let response = pool.recv_timeout(WAIT).unwrap().unwrap().unwrap();
            assert_eq!(response.examined, 10);
            assert!(response.worker_id < 3);
            ids.push(response.request_id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
        pool.join();
    }

    #[test]
    fn test_tripped_pool_skips_work() {
        let stop = StopSignal::new();
        let pool = WorkerPool::new(2, stop.clone()).unwrap();
        stop.trip();

        pool.dispatch(request(1, 1_000_000, &Arc::new(Pattern::empty())))
            .unwrap();
        let response = pool.recv_timeout(WAIT).unwrap().unwrap().unwrap();
        assert_eq!(response.examined, 0);
        assert!(response.found.is_none());
    }

    #[test]
    fn test_zero_workers_clamped() {
        let pool = WorkerPool::new(0, StopSignal::new()).unwrap();
        assert_eq!(pool.num_workers(), 1);
    }
}
