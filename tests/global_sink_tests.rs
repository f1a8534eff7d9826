// Global-sink reset, checked in a process of its own
//
// Only one test lives here, so the first `Benchmark` built is guaranteed to
// find the global subscriber slot empty.

use sniffer::{Benchmark, ConsoleInstall, ProfileConfig, TrackingAllocator};
use std::alloc::System;
use tracing::Level;

#[global_allocator]
static ALLOCATOR: TrackingAllocator<System> = TrackingAllocator::system();

#[tracing::instrument]
fn inner_step(n: u32) -> u32 {
    n + 1
}

#[test]
fn test_reset_installs_console_then_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reset.log");
    let config = ProfileConfig::default()
        .with_log_file(&path)
        .with_log_level(Level::DEBUG)
        .with_reset_global_sinks(true);

    let first = Benchmark::new(config.clone());
    assert_eq!(first.console(), Some(ConsoleInstall::Installed));
    assert_eq!(
        sniffer::logging::install_console(Level::INFO),
        ConsoleInstall::AlreadySet
    );

    // The installed subscriber carries the call-graph layer
    let stepped = first.wrap("stepped", |n: u32| inner_step(n));
    assert_eq!(stepped.call((1,)).unwrap(), 2);
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("(inner_step)"), "report: {}", content);

    let second = Benchmark::new(config);
    assert_eq!(second.console(), Some(ConsoleInstall::AlreadySet));
    let greet = second.wrap("greet", || "hi");
    assert_eq!(greet.call(()).unwrap(), "hi");

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.matches("Execution Summary").count(), 2);
    assert!(content.contains("Function 'greet' Execution Summary"));
}
