//! Property-based tests for configuration parsing and profile rendering
//!
//! Kept small enough to run as a pre-commit gate.

use proptest::prelude::*;
use sniffer::function_profiler::{FunctionKey, FunctionStats, ProfileStats};
use sniffer::{LogLevel, ProfileConfig, SortKey};
use std::time::Duration;

fn sort_key() -> impl Strategy<Value = SortKey> {
    prop::sample::select(SortKey::ALL.to_vec())
}

fn entry() -> impl Strategy<Value = (FunctionKey, FunctionStats)> {
    (
        "[a-z]{1,8}",
        1u32..500,
        1u64..50,
        0u64..50,
        0u64..10_000,
        0u64..10_000,
    )
        .prop_map(|(name, line, calls, recursive, own_us, extra_us)| {
            let primitive = calls.saturating_sub(recursive).max(1);
            (
                FunctionKey::new("src/lib.rs", line, name),
                FunctionStats {
                    calls,
                    primitive_calls: primitive,
                    total_time: Duration::from_micros(own_us),
                    cumulative_time: Duration::from_micros(own_us + extra_us),
                },
            )
        })
}

fn table_rows(rendered: &str) -> usize {
    rendered.lines().filter(|l| l.contains("src/lib.rs:")).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_sort_key_display_parses_back(key in sort_key()) {
        // Property: every key's name parses to the same key
        let parsed: SortKey = key.to_string().parse().unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn prop_unknown_sort_key_rejected(name in "[a-z]{1,12}") {
        let known = SortKey::ALL.iter().any(|k| k.as_str() == name)
            || name == "tottime"
            || name == "cumtime";
        prop_assert_eq!(name.parse::<SortKey>().is_ok(), known);
    }

    #[test]
    fn prop_config_parsing_never_panics(content in "\\PC{0,200}") {
        // Property: arbitrary text yields a config or an error, never a panic
        let _ = ProfileConfig::from_toml_str(&content);
    }

    #[test]
    fn prop_config_fields_survive_toml(
        key in sort_key(),
        lines in 0usize..1000,
        append in any::<bool>(),
        level in prop::sample::select(vec![
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]),
    ) {
        let toml = format!(
            "sort_by = \"{}\"\nlines_to_print = {}\nappend_log = {}\nlog_level = \"{}\"\n",
            key, lines, append, level
        );
        let config = ProfileConfig::from_toml_str(&toml).unwrap();
        prop_assert_eq!(config.sort_by, key);
        prop_assert_eq!(config.lines_to_print, lines);
        prop_assert_eq!(config.append_log, append);
        prop_assert_eq!(config.log_level, level);
        prop_assert_eq!(config.log_file, ProfileConfig::default().log_file);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_render_respects_limit(
        entries in prop::collection::vec(entry(), 0..20),
        key in sort_key(),
        limit in 0usize..25,
    ) {
        let mut stats: ProfileStats = entries.into_iter().collect();
        let total = stats.len();
        let rendered = stats.sort_stats(key).render(limit);

        // Property: never more rows than the limit or the entries
        prop_assert_eq!(table_rows(&rendered), total.min(limit));
        prop_assert!(rendered.contains(" function calls"));

        let reduced = rendered.contains("List reduced from");
        prop_assert_eq!(reduced, limit > 0 && limit < total);
    }

    #[test]
    fn prop_sort_by_calls_is_descending(entries in prop::collection::vec(entry(), 1..20)) {
        let mut stats: ProfileStats = entries.into_iter().collect();
        stats.sort_stats(SortKey::Calls);

        let calls: Vec<u64> = stats.entries().iter().map(|(_, s)| s.calls).collect();
        prop_assert!(calls.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn prop_call_totals_add_up(entries in prop::collection::vec(entry(), 0..20)) {
        let expected_calls: u64 = entries.iter().map(|(_, s)| s.calls).sum();
        let expected_primitive: u64 = entries.iter().map(|(_, s)| s.primitive_calls).sum();

        let stats: ProfileStats = entries.into_iter().collect();
        prop_assert_eq!(stats.total_calls(), expected_calls);
        prop_assert_eq!(stats.primitive_calls(), expected_primitive);
        prop_assert!(stats.total_calls() >= stats.primitive_calls());
    }

    #[test]
    fn prop_bytes_to_kb_scales(bytes in 0usize..(1 << 40)) {
        let kb = sniffer::memory::bytes_to_kb(bytes);
        prop_assert!((kb * 1024.0 - bytes as f64).abs() < 1e-3);
    }
}
