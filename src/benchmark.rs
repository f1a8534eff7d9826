//! The profiling wrapper
//!
//! A [`Benchmark`] holds one configuration and hands out wrapped callables.
//! [`Benchmark::wrap`] is for plain functions and closures,
//! [`Benchmark::wrap_async`] for ones returning a future. The wrapper type
//! decides the execution path once, when wrapping.
//!
//! Every invocation of a wrapped callable:
//! 1. begins a [`Trace`] (memory session, profiler, clocks),
//! 2. runs the callable, catching a panic if it raises one,
//! 3. logs an error entry if the callable failed,
//! 4. ends the trace and composes the report,
//! 5. emits the report to the sink and writes it to the report file,
//! 6. returns the value or resumes the panic.
//!
//! A report that cannot be written replaces the outcome with a
//! [`ReportError`], even when the callable panicked.
//!
//! ```no_run
//! use sniffer::{Benchmark, ProfileConfig};
//!
//! let bench = Benchmark::new(ProfileConfig::default());
//! let greet = bench.wrap("greet", |name: &str| format!("Hello, {}!", name));
//! let text = greet.call(("World",)).expect("report written");
//! assert_eq!(text, "Hello, World!");
//! ```

use crate::config::ProfileConfig;
use crate::error::{Failure, ReportError};
use crate::function_profiler::FunctionKey;
use crate::logging::{self, ConsoleInstall};
use crate::profiling::{AnalysisResult, Trace};
use crate::report::{self, ConsoleSink, ReportSink, TracingSink};
use futures::FutureExt;
use std::any::Any;
use std::fmt::{self, Display};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use tracing::Level;

/// A function or closure callable with an argument tuple
///
/// Implemented for every `Fn` of up to six arguments: a `Fn(A, B) -> R`
/// is a `Callable<(A, B), Output = R>`.
pub trait Callable<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

macro_rules! impl_callable {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> Callable<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn invoke(&self, ($($arg,)*): ($($arg,)*)) -> Ret {
                (self)($($arg),*)
            }
        }
    };
}

impl_callable!();
impl_callable!(A1);
impl_callable!(A1, A2);
impl_callable!(A1, A2, A3);
impl_callable!(A1, A2, A3, A4);
impl_callable!(A1, A2, A3, A4, A5);
impl_callable!(A1, A2, A3, A4, A5, A6);

struct Shared {
    config: ProfileConfig,
    level: Level,
    sink: Arc<dyn ReportSink>,
    console: Option<ConsoleInstall>,
}

/// A configured profiling decorator
///
/// Cloning is cheap; clones share configuration and sink.
#[derive(Clone)]
pub struct Benchmark {
    shared: Arc<Shared>,
}

impl fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Benchmark")
            .field("config", &self.shared.config)
            .field("console", &self.shared.console)
            .finish_non_exhaustive()
    }
}

impl Benchmark {
    /// Build a benchmark that reports through `tracing`
    ///
    /// With `reset_global_sinks` set, a console subscriber is installed as
    /// the global default. If another global subscriber already owns that
    /// slot, reports go straight to stderr instead.
    pub fn new(config: ProfileConfig) -> Self {
        let level = Level::from(config.log_level);
        let console = config.reset_global_sinks.then(|| logging::install_console(level));
        let sink: Arc<dyn ReportSink> = match console {
            Some(ConsoleInstall::AlreadySet) => {
                tracing::warn!(
                    target: "sniffer",
                    "a global subscriber is already set; reports go to stderr directly"
                );
                Arc::new(ConsoleSink::new(level))
            }
            Some(ConsoleInstall::Installed) | None => Arc::new(TracingSink),
        };

        Self::build(config, level, sink, console)
    }

    /// Build a benchmark that reports to `sink`
    ///
    /// `reset_global_sinks` still installs the console subscriber, but
    /// reports always go to the given sink.
    pub fn with_sink(config: ProfileConfig, sink: impl ReportSink + 'static) -> Self {
        let level = Level::from(config.log_level);
        let console = config.reset_global_sinks.then(|| logging::install_console(level));
        if console == Some(ConsoleInstall::AlreadySet) {
            tracing::warn!(target: "sniffer", "a global subscriber is already set");
        }
        Self::build(config, level, Arc::new(sink), console)
    }

    fn build(
        config: ProfileConfig,
        level: Level,
        sink: Arc<dyn ReportSink>,
        console: Option<ConsoleInstall>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                level,
                sink,
                console,
            }),
        }
    }

    /// Outcome of the global-sink reset, `None` when it was not requested
    pub fn console(&self) -> Option<ConsoleInstall> {
        self.shared.console
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.shared.config
    }

    /// Wrap a synchronous callable
    ///
    /// `name` labels the report; the caller's location labels the root entry
    /// of the call-graph profile.
    #[track_caller]
    pub fn wrap<F>(&self, name: impl Into<String>, func: F) -> Profiled<F> {
        Profiled {
            func,
            site: Site::new(name.into(), Location::caller()),
            bench: self.clone(),
        }
    }

    /// Wrap a callable that returns a future
    #[track_caller]
    pub fn wrap_async<F>(&self, name: impl Into<String>, func: F) -> ProfiledAsync<F> {
        ProfiledAsync {
            func,
            site: Site::new(name.into(), Location::caller()),
            bench: self.clone(),
        }
    }

    /// Profile a single run of `func`
    #[track_caller]
    pub fn run<R>(&self, name: impl Into<String>, func: impl FnOnce() -> R) -> Result<R, ReportError> {
        let site = Site::new(name.into(), Location::caller());
        let trace = Trace::begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(func));
        self.settle(&site, trace, outcome, |_| None)
    }

    /// Emit `message` if `level` is at least as severe as the configured one
    fn log(&self, level: Level, message: &str) {
        if level <= self.shared.level {
            self.shared.sink.emit(level, message);
        }
    }

    fn raised(&self, site: &Site, failure: &dyn Display) {
        self.log(
            Level::ERROR,
            &format!("Function '{}' raised an exception: {}", site.name, failure),
        );
    }

    /// End the trace, then deliver the report to the sink and the file
    fn finish(&self, site: &Site, trace: Trace) -> Result<AnalysisResult, ReportError> {
        let config = &self.shared.config;
        let analysis = trace.end(site.key.clone(), config.sort_by, config.lines_to_print);
        let message = report::compose(&site.name, &analysis);

        self.log(self.shared.level, &message);
        if let Some(path) = &config.log_file {
            report::write_to_file(path, &message, config.append_log)?;
        }
        Ok(analysis)
    }

    /// Log failures, finish the trace and hand back the callable's outcome
    fn settle<R>(
        &self,
        site: &Site,
        trace: Trace,
        outcome: std::thread::Result<R>,
        failed: fn(&R) -> Option<String>,
    ) -> Result<R, ReportError> {
        match outcome {
            Ok(value) => {
                if let Some(failure) = failed(&value) {
                    self.raised(site, &failure);
                }
                self.finish(site, trace)?;
                Ok(value)
            }
            Err(payload) => {
                self.raised(site, &panic_message(payload.as_ref()));
                self.finish(site, trace)?;
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Shorthand for [`Benchmark::new`]
pub fn benchmark(config: ProfileConfig) -> Benchmark {
    Benchmark::new(config)
}

#[derive(Debug, Clone)]
struct Site {
    name: String,
    key: FunctionKey,
}

impl Site {
    fn new(name: String, location: &'static Location<'static>) -> Self {
        let key = FunctionKey::new(location.file(), location.line(), name.clone());
        Self { name, key }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn err_text<T, E: Display>(result: &Result<T, E>) -> Option<String> {
    result.as_ref().err().map(ToString::to_string)
}

/// A synchronous callable that profiles every invocation
pub struct Profiled<F> {
    func: F,
    site: Site,
    bench: Benchmark,
}

impl<F> Profiled<F> {
    /// Name used in reports
    pub fn name(&self) -> &str {
        &self.site.name
    }

    /// The wrapped callable, unprofiled
    pub fn inner(&self) -> &F {
        &self.func
    }

    /// Call with an argument tuple and return the callable's value untouched
    ///
    /// A panic inside the callable is logged, reported, then resumed.
    pub fn call<Args>(&self, args: Args) -> Result<F::Output, ReportError>
    where
        F: Callable<Args>,
    {
        let trace = Trace::begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.func.invoke(args)));
        self.bench.settle(&self.site, trace, outcome, |_| None)
    }

    /// Call a callable returning `Result`; an `Err` is logged and returned
    /// as [`Failure::Raised`]
    pub fn try_call<Args, T, E>(&self, args: Args) -> Result<T, Failure<E>>
    where
        F: Callable<Args, Output = Result<T, E>>,
        E: Display,
    {
        let trace = Trace::begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.func.invoke(args)));
        self.bench
            .settle(&self.site, trace, outcome, err_text)?
            .map_err(Failure::Raised)
    }
}

impl<F> fmt::Debug for Profiled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiled")
            .field("name", &self.site.name)
            .field("site", &self.site.key)
            .finish_non_exhaustive()
    }
}

/// An asynchronous callable that profiles every invocation
///
/// `call` returns a future; nothing is measured or invoked until it is
/// awaited. Dropping the future mid-flight releases the profiler and the
/// memory session without writing a report.
pub struct ProfiledAsync<F> {
    func: F,
    site: Site,
    bench: Benchmark,
}

impl<F> ProfiledAsync<F> {
    pub fn name(&self) -> &str {
        &self.site.name
    }

    pub fn inner(&self) -> &F {
        &self.func
    }

    pub async fn call<Args>(
        &self,
        args: Args,
    ) -> Result<<F::Output as Future>::Output, ReportError>
    where
        F: Callable<Args>,
        F::Output: Future,
    {
        self.drive(args, |_| None).await
    }

    pub async fn try_call<Args, T, E>(&self, args: Args) -> Result<T, Failure<E>>
    where
        F: Callable<Args>,
        F::Output: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.drive(args, err_text).await?.map_err(Failure::Raised)
    }

    async fn drive<Args, R>(
        &self,
        args: Args,
        failed: fn(&R) -> Option<String>,
    ) -> Result<R, ReportError>
    where
        F: Callable<Args>,
        F::Output: Future<Output = R>,
    {
        let trace = Trace::begin();
        let outcome = AssertUnwindSafe(async move { self.func.invoke(args).await })
            .catch_unwind()
            .await;
        self.bench.settle(&self.site, trace, outcome, failed)
    }
}

impl<F> fmt::Debug for ProfiledAsync<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfiledAsync")
            .field("name", &self.site.name)
            .field("site", &self.site.key)
            .finish_non_exhaustive()
    }
}
