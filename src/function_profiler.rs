//! Call-graph profiling on top of `tracing` spans
//!
//! [`layer()`] returns a `tracing-subscriber` layer. While at least one
//! [`Profiler`] is enabled, every span entered and exited on any thread is
//! timed and recorded into each enabled profiler's table, keyed by the span's
//! `file:line(name)`. Functions annotated with `#[tracing::instrument]` and
//! hand-made spans both show up.
//!
//! Features:
//! - Call counts, with primitive (non-recursive) calls counted apart
//! - Own time (`tottime`) and cumulative time (`cumtime`)
//! - Sorting by any [`SortKey`] and truncated tabular rendering
//!
//! The registry of enabled profilers is process-wide, so two profilers
//! enabled at the same time both receive every span.

use crate::config::SortKey;
use parking_lot::{const_rwlock, Mutex, RwLock};
use serde::Serialize;
use std::borrow::Cow;
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::span;
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

type SharedTable = Arc<Mutex<ProfileTable>>;

static ACTIVE: RwLock<Vec<SharedTable>> = const_rwlock(Vec::new());
static ACTIVE_COUNT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Identity of a profiled function: where it lives and what it is called
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionKey {
    pub file: Cow<'static, str>,
    pub line: u32,
    pub name: Cow<'static, str>,
}

impl FunctionKey {
    pub fn new(
        file: impl Into<Cow<'static, str>>,
        line: u32,
        name: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            name: name.into(),
        }
    }

    fn from_metadata(metadata: &'static tracing::Metadata<'static>) -> Self {
        Self {
            file: Cow::Borrowed(metadata.file().unwrap_or("~")),
            line: metadata.line().unwrap_or(0),
            name: Cow::Borrowed(metadata.name()),
        }
    }

    /// `file:line(name)`
    pub fn std_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.file, self.line, self.name)
    }
}

/// Statistics for a single function
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunctionStats {
    /// Number of times the function was entered
    pub calls: u64,
    /// Calls that were not nested inside another call of the same function
    pub primitive_calls: u64,
    /// Time spent in the function itself, excluding callees
    pub total_time: Duration,
    /// Time spent in the function and its callees (outermost calls only)
    pub cumulative_time: Duration,
}

impl FunctionStats {
    fn total_per_call(&self) -> Option<f64> {
        (self.calls > 0).then(|| self.total_time.as_secs_f64() / self.calls as f64)
    }

    fn cumulative_per_call(&self) -> Option<f64> {
        (self.primitive_calls > 0)
            .then(|| self.cumulative_time.as_secs_f64() / self.primitive_calls as f64)
    }
}

/// Accumulated statistics of one profiler
#[derive(Debug, Default)]
struct ProfileTable {
    stats: HashMap<FunctionKey, FunctionStats>,
    /// Cumulative time of spans that had no profiled parent
    top_level: Duration,
}

impl ProfileTable {
    fn record(&mut self, key: &FunctionKey, elapsed: Duration, own: Duration, primitive: bool) {
        let entry = self.stats.entry(key.clone()).or_default();
        entry.calls += 1;
        entry.total_time += own;
        if primitive {
            entry.primitive_calls += 1;
            entry.cumulative_time += elapsed;
        }
    }
}

/// Entry on the thread-local span stack
struct Frame {
    span: span::Id,
    key: FunctionKey,
    start: Instant,
    children: Duration,
}

fn enter_frame(span: span::Id, key: FunctionKey) {
    let _ = STACK.try_with(|stack| {
        stack.borrow_mut().push(Frame {
            span,
            key,
            start: Instant::now(),
            children: Duration::ZERO,
        });
    });
}

fn exit_frame(span: &span::Id) {
    let _ = STACK.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        // Spans entered before any profiler was enabled have no frame
        let Some(pos) = stack.iter().rposition(|frame| &frame.span == span) else {
            return;
        };
        let frame = stack.remove(pos);
        let elapsed = frame.start.elapsed();
        let own = elapsed.saturating_sub(frame.children);
        let recursive = stack[..pos].iter().any(|outer| outer.key == frame.key);

        let top_level = match pos.checked_sub(1).and_then(|p| stack.get_mut(p)) {
            Some(parent) => {
                parent.children += elapsed;
                false
            }
            None => true,
        };
        drop(stack);

        if ACTIVE_COUNT.load(Ordering::Acquire) == 0 {
            return;
        }
        for table in ACTIVE.read().iter() {
            let mut table = table.lock();
            table.record(&frame.key, elapsed, own, !recursive);
            if top_level {
                table.top_level += elapsed;
            }
        }
    });
}

/// Number of profilers currently enabled, process-wide
pub fn active_profilers() -> usize {
    ACTIVE_COUNT.load(Ordering::Acquire)
}

/// `tracing-subscriber` layer feeding enabled [`Profiler`]s
///
/// ```
/// use tracing_subscriber::prelude::*;
///
/// let subscriber = tracing_subscriber::registry().with(sniffer::function_profiler::layer());
/// tracing::subscriber::with_default(subscriber, || {
///     let _span = tracing::info_span!("work").entered();
/// });
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CallGraphLayer {
    _private: (),
}

/// Create the call-graph layer
pub fn layer() -> CallGraphLayer {
    CallGraphLayer::default()
}

impl<S> Layer<S> for CallGraphLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        if ACTIVE_COUNT.load(Ordering::Acquire) == 0 {
            return;
        }
        if let Some(metadata) = ctx.metadata(id) {
            enter_frame(id.clone(), FunctionKey::from_metadata(metadata));
        }
    }

    fn on_exit(&self, id: &span::Id, _ctx: Context<'_, S>) {
        exit_frame(id);
    }
}

/// A call-graph profiler with enable/disable semantics
///
/// Dropping an enabled profiler disables it.
#[derive(Debug)]
pub struct Profiler {
    table: SharedTable,
    enabled: bool,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ProfileTable::default())),
            enabled: false,
        }
    }

    /// Start receiving span timings
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        ACTIVE.write().push(Arc::clone(&self.table));
        ACTIVE_COUNT.fetch_add(1, Ordering::AcqRel);
        self.enabled = true;
    }

    /// Stop receiving span timings; collected data is kept
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        ACTIVE
            .write()
            .retain(|table| !Arc::ptr_eq(table, &self.table));
        ACTIVE_COUNT.fetch_sub(1, Ordering::AcqRel);
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the profiled function itself as a single primitive call
    ///
    /// Its own time is `elapsed` minus the time spent in spans that had no
    /// profiled parent.
    pub fn record_root(&self, key: FunctionKey, elapsed: Duration) {
        let mut table = self.table.lock();
        let own = elapsed.saturating_sub(table.top_level);
        table.record(&key, elapsed, own, true);
    }

    /// Snapshot of everything recorded so far, in unspecified order
    pub fn stats(&self) -> ProfileStats {
        let table = self.table.lock();
        ProfileStats {
            entries: table
                .stats
                .iter()
                .map(|(key, stats)| (key.clone(), stats.clone()))
                .collect(),
            sorted_by: None,
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Sortable, renderable view of a profiler's statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileStats {
    entries: Vec<(FunctionKey, FunctionStats)>,
    sorted_by: Option<SortKey>,
}

impl ProfileStats {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(FunctionKey, FunctionStats)] {
        &self.entries
    }

    /// First entry whose function name matches
    pub fn find(&self, name: &str) -> Option<&FunctionStats> {
        self.entries
            .iter()
            .find(|(key, _)| key.name == name)
            .map(|(_, stats)| stats)
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.iter().map(|(_, s)| s.calls).sum()
    }

    pub fn primitive_calls(&self) -> u64 {
        self.entries.iter().map(|(_, s)| s.primitive_calls).sum()
    }

    /// Sum of own time across all entries
    pub fn total_time(&self) -> Duration {
        self.entries.iter().map(|(_, s)| s.total_time).sum()
    }

    /// Order entries by `key`; ties fall back to `file:line(name)`
    pub fn sort_stats(&mut self, key: SortKey) -> &mut Self {
        self.entries
            .sort_by(|(ka, sa), (kb, sb)| compare(key, ka, sa, kb, sb).then_with(|| ka.cmp(kb)));
        self.sorted_by = Some(key);
        self
    }

    /// Render at most `limit` entries as a table
    pub fn render(&self, limit: usize) -> String {
        let mut out = String::new();
        let total = self.total_calls();
        let primitive = self.primitive_calls();

        let _ = write!(out, "         {} function calls", total);
        if total != primitive {
            let _ = write!(out, " ({} primitive calls)", primitive);
        }
        let _ = writeln!(out, " in {:.3} seconds", self.total_time().as_secs_f64());
        out.push('\n');

        let shown = self.entries.len().min(limit);
        if shown == 0 {
            return out;
        }

        match self.sorted_by {
            Some(key) => {
                let _ = writeln!(out, "   Ordered by: {}", key.description());
            }
            None => out.push_str("   Random listing order was used\n"),
        }
        if shown < self.entries.len() {
            let _ = writeln!(
                out,
                "   List reduced from {} to {} due to restriction <{}>",
                self.entries.len(),
                shown,
                limit
            );
        }
        out.push('\n');

        out.push_str("   ncalls  tottime  percall  cumtime  percall filename:lineno(function)\n");
        for (key, stats) in self.entries.iter().take(shown) {
            let mut calls = stats.calls.to_string();
            if stats.calls != stats.primitive_calls {
                let _ = write!(calls, "/{}", stats.primitive_calls);
            }
            let _ = write!(
                out,
                "{:>9} {:>8.3} {} {:>8.3} {} {}",
                calls,
                stats.total_time.as_secs_f64(),
                per_call(stats.total_per_call()),
                stats.cumulative_time.as_secs_f64(),
                per_call(stats.cumulative_per_call()),
                key
            );
            out.push('\n');
        }
        out.push_str("\n\n");
        out
    }
}

impl FromIterator<(FunctionKey, FunctionStats)> for ProfileStats {
    fn from_iter<I: IntoIterator<Item = (FunctionKey, FunctionStats)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            sorted_by: None,
        }
    }
}

fn per_call(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:>8.3}", v),
        None => " ".repeat(8),
    }
}

fn compare(
    key: SortKey,
    ka: &FunctionKey,
    sa: &FunctionStats,
    kb: &FunctionKey,
    sb: &FunctionStats,
) -> CmpOrdering {
    match key {
        SortKey::Calls => sb.calls.cmp(&sa.calls),
        SortKey::Cumulative => sb.cumulative_time.cmp(&sa.cumulative_time),
        SortKey::Filename => ka.file.cmp(&kb.file),
        SortKey::Line => ka.line.cmp(&kb.line),
        SortKey::Name => ka.name.cmp(&kb.name),
        SortKey::Nfl => ka
            .name
            .cmp(&kb.name)
            .then_with(|| ka.file.cmp(&kb.file))
            .then_with(|| ka.line.cmp(&kb.line)),
        SortKey::Pcalls => sb.primitive_calls.cmp(&sa.primitive_calls),
        SortKey::Stdname => ka.std_name().cmp(&kb.std_name()),
        SortKey::Time => sb.total_time.cmp(&sa.total_time),
    }
}
