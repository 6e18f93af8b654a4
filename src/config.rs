//! Runtime configuration for the vanity address search.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::error::VanityError;
use crate::matcher::Pattern;
use crate::search::{Backend, DEFAULT_CPU_BATCH};
use crate::worker::gpu::{check_batch_len, MAX_GPU_BATCH};

/// Which hardware runs the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "gpu" | "opencl" => Ok(BackendKind::Gpu),
            _ => Err(format!("Invalid backend: {}. Use: cpu or gpu", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// Ethereum Vanity Address Search
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Leading hex digits the address must start with (after 0x)
    #[arg(short, long, default_value = "")]
    pub prefix: String,

    /// Trailing hex digits the address must end with
    #[arg(short, long, default_value = "")]
    pub suffix: String,

    /// Backend: cpu or gpu (gpu falls back to cpu if unavailable)
    #[arg(short, long, default_value = "cpu")]
    pub backend: BackendKind,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Candidates per CPU worker request
    #[arg(long, default_value_t = DEFAULT_CPU_BATCH)]
    pub batch_size: usize,

    /// Keys per GPU batch (1 to 16384)
    #[arg(long, default_value_t = MAX_GPU_BATCH)]
    pub gpu_batch_size: usize,

    /// GPU device index to use
    #[arg(long, default_value = "0")]
    pub gpu_device: usize,

    /// Progress report interval in seconds
    #[arg(short, long, default_value = "5")]
    pub report_interval: u64,

    /// List OpenCL GPU devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Config {
    /// Checks every option before any search state is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pattern()?;

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("--batch-size must be at least 1".into()));
        }

        if self.backend == BackendKind::Gpu {
            check_batch_len(self.gpu_batch_size)?;
        }

        if self.report_interval == 0 {
            return Err(ConfigError::Invalid(
                "--report-interval must be at least 1 second".into(),
            ));
        }

        Ok(())
    }

    /// Parses the prefix and suffix into a pattern.
    pub fn pattern(&self) -> Result<Pattern, ConfigError> {
        Ok(Pattern::from_hex(&self.prefix, &self.suffix)?)
    }

    /// Returns the number of workers, defaulting to CPU count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Returns the selected backend with its parameters.
    pub fn backend(&self) -> Backend {
        match self.backend {
            BackendKind::Cpu => Backend::Cpu {
                workers: self.worker_count(),
            },
            BackendKind::Gpu => Backend::Gpu {
                device_index: self.gpu_device,
                fallback_workers: self.worker_count(),
            },
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Search(#[from] VanityError),
    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("vanity_search").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.prefix, "");
        assert_eq!(config.suffix, "");
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.gpu_batch_size, 16384);
        assert_eq!(config.report_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
        assert!(config.pattern().unwrap().is_empty());
    }

    #[test]
    fn test_valid_pattern() {
        let config = parse(&["-p", "dead", "-s", "BEEF"]);
        assert!(config.validate().is_ok());
        let pattern = config.pattern().unwrap();
        assert_eq!(pattern.prefix_hex(), "dead");
        assert_eq!(pattern.suffix_hex(), "beef");
    }

    #[test]
    fn test_invalid_pattern() {
        let config = parse(&["-p", "xyz"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Search(VanityError::InvalidPatternDigit('x')))
        ));
    }

    #[test]
    fn test_pattern_too_long() {
        let config = parse(&["-s", &"a".repeat(41)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gpu_batch_size_checked() {
        let config = parse(&["-b", "gpu", "--gpu-batch-size", "0"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Search(VanityError::InvalidBatchSize(_)))
        ));

        let config = parse(&["-b", "gpu", "--gpu-batch-size", "20000"]);
        assert!(config.validate().is_err());

        // Any size the matcher accepts is accepted here too.
        let config = parse(&["-b", "gpu", "--gpu-batch-size", "100"]);
        assert!(config.validate().is_ok());

        let config = parse(&["-b", "gpu", "--gpu-batch-size", "8192"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_selection() {
        let config = parse(&["-b", "gpu", "-w", "3", "--gpu-device", "1"]);
        assert_eq!(
            config.backend(),
            Backend::Gpu {
                device_index: 1,
                fallback_workers: 3
            }
        );

        let config = parse(&["-w", "0"]);
        assert_eq!(config.backend(), Backend::Cpu { workers: 1 });
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("CPU".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert_eq!("opencl".parse::<BackendKind>().unwrap(), BackendKind::Gpu);
        assert!("tpu".parse::<BackendKind>().is_err());
    }
}
