//! Ethereum Vanity Address Search CLI
//!
//! Usage:
//!   vanity_search -p dead              # Find an address starting with "dead"
//!   vanity_search -s beef              # Find an address ending with "beef"
//!   vanity_search -p 00 -s 00 -b gpu   # Prefix and suffix on the GPU

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use vanity_search::search::format_number;
use vanity_search::worker::gpu::list_devices;
use vanity_search::{Config, SearchOrchestrator, SearchReport};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    if config.list_devices {
        print_devices();
        return;
    }

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }

    let pattern = match config.pattern() {
        Ok(pattern) => pattern,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    println!("Ethereum Vanity Address Search");
    println!("==============================");
    println!("Pattern:    {}", pattern);
    println!("Difficulty: {}", pattern.difficulty_description());
    println!("Backend:    {}", config.backend());
    println!();

    let orchestrator = SearchOrchestrator::new(pattern)
        .with_cpu_batch_size(config.batch_size)
        .with_gpu_batch_size(config.gpu_batch_size)
        .with_report_interval(config.report_interval());

    ctrlc_handler(orchestrator.stop_signal().flag());

    println!("Searching... (Press Ctrl+C to stop)\n");

    match orchestrator.run(config.backend()) {
        Ok(report) => {
            print_report(&report);
            if report.found.is_none() {
                process::exit(130);
            }
        }
        Err(e) => {
            eprintln!("Search failed: {}", e);
            process::exit(1);
        }
    }
}

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("No OpenCL GPU devices found (is the `gpu` feature enabled?)");
        return;
    }
    for (index, name) in devices.iter().enumerate() {
        println!("[{}] {}", index, name);
    }
}

fn print_report(report: &SearchReport) {
    match &report.found {
        Some(found) => {
            println!("=== Match ===");
            println!("Address:     {}", found.address_hex());
            println!("Private Key: {}", found.private_key_hex());
            println!();
        }
        None => println!("\nStopped by user."),
    }

    println!("--- Final Statistics ---");
    println!("Backend:              {}", report.backend);
    println!("Total keys generated: {}", format_number(report.examined));
    println!("Batches:              {}", report.batches);
    println!("Time elapsed:         {:.2}s", report.elapsed.as_secs_f64());
    println!(
        "Average speed:        {}/s",
        format_number(report.keys_per_second() as u64)
    );
}

fn ctrlc_handler(stop_flag: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::Release);
    }) {
        log::warn!("Error setting Ctrl-C handler: {}", e);
    }
}
