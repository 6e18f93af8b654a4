//! Search orchestration: drives a backend until the first confirmed match.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};

use crate::crypto::CandidateSource;
use crate::error::VanityError;
use crate::matcher::Pattern;
use crate::worker::gpu::{ComputeDevice, GpuBatchMatcher, MAX_GPU_BATCH};
use crate::worker::{SearchRequest, StopSignal, VanityMatch, WorkerPool};

/// Default candidates per CPU request.
pub const DEFAULT_CPU_BATCH: usize = 4096;

/// Shortest progress interval; also bounds how long the CPU loop blocks per poll.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Which backend a search runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A pool of CPU worker threads.
    Cpu { workers: usize },
    /// An OpenCL GPU, falling back to `fallback_workers` CPU threads if it
    /// cannot be acquired.
    Gpu {
        device_index: usize,
        fallback_workers: usize,
    },
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu { workers } => write!(f, "cpu ({} workers)", workers),
            Backend::Gpu { device_index, .. } => write!(f, "gpu (device {})", device_index),
        }
    }
}

/// Outcome of a search session.
#[derive(Debug)]
pub struct SearchReport {
    /// The accepted match; `None` if the search was cancelled first
    pub found: Option<VanityMatch>,
    /// Candidates examined by every accepted batch
    pub examined: u64,
    /// Batches whose results were counted
    pub batches: u64,
    pub elapsed: Duration,
    /// Name of the backend that ran the search
    pub backend: String,
}

impl SearchReport {
    /// Average generation rate (keys per second).
    pub fn keys_per_second(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed > 0.0 {
            self.examined as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Running totals for progress reporting.
struct Progress {
    examined: u64,
    batches: u64,
    start: Instant,
    last_report: Instant,
    interval: Duration,
}

impl Progress {
    fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            examined: 0,
            batches: 0,
            start: now,
            last_report: now,
            interval,
        }
    }

    fn record(&mut self, examined: u64) {
        self.examined += examined;
        self.batches += 1;
    }

    fn maybe_report(&mut self) {
        if self.last_report.elapsed() < self.interval {
            return;
        }
        self.last_report = Instant::now();
        let elapsed = self.start.elapsed();
        let rate = self.examined as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        log::info!(
            "[{:>4}s] Generated {} keys ({}/s)",
            elapsed.as_secs(),
            format_number(self.examined),
            format_number(rate as u64)
        );
    }

    fn finish(self, found: Option<VanityMatch>, backend: String) -> SearchReport {
        SearchReport {
            found,
            examined: self.examined,
            batches: self.batches,
            elapsed: self.start.elapsed(),
            backend,
        }
    }
}

/// Formats a count with a K/M/B suffix.
pub fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Owns a pattern and runs searches for it.
pub struct SearchOrchestrator {
    pattern: Arc<Pattern>,
    cpu_batch_size: usize,
    gpu_batch_size: usize,
    report_interval: Duration,
    stop: StopSignal,
}

impl SearchOrchestrator {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern: Arc::new(pattern),
            cpu_batch_size: DEFAULT_CPU_BATCH,
            gpu_batch_size: MAX_GPU_BATCH,
            report_interval: Duration::from_secs(5),
            stop: StopSignal::new(),
        }
    }

    /// Candidates per CPU request (at least 1).
    pub fn with_cpu_batch_size(mut self, batch_size: usize) -> Self {
        self.cpu_batch_size = batch_size.max(1);
        self
    }

    /// Keys per GPU submission. Out-of-range values are rejected by the matcher.
    pub fn with_gpu_batch_size(mut self, batch_size: usize) -> Self {
        self.gpu_batch_size = batch_size;
        self
    }

    /// Progress interval, at least [`MIN_REPORT_INTERVAL`].
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval.max(MIN_REPORT_INTERVAL);
        self
    }

    pub fn report_interval(&self) -> Duration {
        self.report_interval
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// The signal that ends the search. Tripping it externally cancels the search.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Runs a search on `backend`.
    ///
    /// A GPU that cannot be acquired is not an error: the search continues on the CPU pool.
    pub fn run(&self, backend: Backend) -> Result<SearchReport, VanityError> {
        if self.pattern.is_empty() {
            log::warn!("Empty pattern: the first candidate will match");
        }
        if self.pattern.overlaps() {
            log::debug!("Prefix and suffix windows overlap");
        }
        log::info!(
            "Searching for {} ({}) on {}",
            self.pattern,
            self.pattern.difficulty_description(),
            backend
        );

        match backend {
            Backend::Cpu { workers } => self.run_cpu(workers),
            Backend::Gpu {
                device_index,
                fallback_workers,
            } => match open_gpu(device_index) {
                Ok(matcher) => self.run_opened_gpu(matcher),
                Err(VanityError::BackendUnavailable(reason)) => {
                    log::warn!("GPU unavailable ({}), falling back to CPU", reason);
                    self.run_cpu(fallback_workers)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Runs the CPU pool with thread-local CSPRNGs.
    pub fn run_cpu(&self, workers: usize) -> Result<SearchReport, VanityError> {
        let pool = WorkerPool::new(workers, self.stop.clone())?;
        self.drive_pool(pool)
    }

    /// Runs the CPU pool with a caller-supplied candidate source per worker.
    pub fn run_cpu_with<R, F>(&self, workers: usize, make_source: F) -> Result<SearchReport, VanityError>
    where
        R: RngCore + CryptoRng + 'static,
        F: Fn(usize) -> CandidateSource<R> + Send + Sync + 'static,
    {
        let pool = WorkerPool::with_sources(workers, self.stop.clone(), make_source)?;
        self.drive_pool(pool)
    }

    /// Keeps one request per worker in flight until a match is accepted or the
    /// search is cancelled.
    fn drive_pool(&self, pool: WorkerPool) -> Result<SearchReport, VanityError> {
        let backend = format!("cpu ({} workers)", pool.num_workers());
        let mut progress = Progress::new(self.report_interval);
        let mut next_id = 0u64;
        let mut in_flight = 0usize;

        let mut request = || {
            let r = SearchRequest {
                request_id: next_id,
                batch_size: self.cpu_batch_size,
                pattern: self.pattern.clone(),
            };
            next_id += 1;
            r
        };

        for _ in 0..pool.num_workers() {
            pool.dispatch(request())?;
            in_flight += 1;
        }

        let mut found = None;
        while in_flight > 0 {
            let Some(reply) = pool.recv_timeout(self.report_interval)? else {
                progress.maybe_report();
                continue;
            };
            in_flight -= 1;
            let response = match reply {
                Ok(response) => response,
                Err(e) => {
                    self.stop.trip();
                    return Err(e);
                }
            };
            progress.record(response.examined);

            if let Some(hit) = response.found {
                // First reported match wins; anything still running is discarded.
                self.stop.trip();
                log::debug!(
                    "request {} on worker {} matched after {} candidates",
                    response.request_id,
                    response.worker_id,
                    response.examined
                );
                found = Some(hit);
                break;
            }

            if !self.stop.is_tripped() {
                pool.dispatch(request())?;
                in_flight += 1;
            }
            progress.maybe_report();
        }

        pool.join();
        Ok(progress.finish(found, backend))
    }

    /// Runs the single-threaded GPU driver loop: generate on the host, match on
    /// the device, confirm on the host.
    pub fn run_gpu<D, R>(
        &self,
        matcher: &mut GpuBatchMatcher<D>,
        source: &mut CandidateSource<R>,
    ) -> Result<SearchReport, VanityError>
    where
        D: ComputeDevice,
        R: RngCore + CryptoRng,
    {
        let backend = format!("gpu ({})", matcher.device_name());
        let mut progress = Progress::new(self.report_interval);
        let mut found = None;

        while !self.stop.is_tripped() {
            let batch = source.generate_batch(self.gpu_batch_size)?;
            let indices = matcher.match_batch(&batch, &self.pattern)?;
            progress.record(batch.len() as u64);

            let verified = batch.resolve(&indices, &self.pattern);
            if verified.len() < indices.len() {
                log::warn!(
                    "{} device match(es) failed host verification",
                    indices.len() - verified.len()
                );
            }

            if let Some(&(index, address)) = verified.first() {
                if let Some(candidate) = batch.into_candidate(index) {
                    self.stop.trip();
                    found = Some(VanityMatch {
                        private_key: candidate.private_key,
                        address,
                    });
                    break;
                }
            }
            progress.maybe_report();
        }

        Ok(progress.finish(found, backend))
    }

    #[cfg(feature = "gpu")]
    fn run_opened_gpu(
        &self,
        mut matcher: GpuBatchMatcher<crate::worker::opencl::OpenClDevice>,
    ) -> Result<SearchReport, VanityError> {
        let mut source = CandidateSource::from_thread_rng();
        let report = self.run_gpu(&mut matcher, &mut source);
        matcher.destroy();
        report
    }

    #[cfg(not(feature = "gpu"))]
    fn run_opened_gpu(&self, never: std::convert::Infallible) -> Result<SearchReport, VanityError> {
        match never {}
    }
}

#[cfg(feature = "gpu")]
fn open_gpu(
    device_index: usize,
) -> Result<GpuBatchMatcher<crate::worker::opencl::OpenClDevice>, VanityError> {
    let device = crate::worker::opencl::OpenClDevice::open(device_index)?;
    Ok(GpuBatchMatcher::new(device))
}

#[cfg(not(feature = "gpu"))]
fn open_gpu(_device_index: usize) -> Result<std::convert::Infallible, VanityError> {
    Err(VanityError::BackendUnavailable(
        "built without the `gpu` feature".into(),
    ))
}
