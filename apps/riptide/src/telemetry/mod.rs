use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A timing line is logged every this many samples of a label.
const REPORT_EVERY: u64 = 100;

fn env_flag(var: &str) -> bool {
    std::env::var(var).is_ok_and(|v| !v.is_empty() && v != "0")
}

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| env_flag("RIPTIDE_PERF"));

static TIMINGS: Lazy<Mutex<HashMap<&'static str, Timing>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub samples: u64,
    pub total: Duration,
    pub slowest: Duration,
}

impl Timing {
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.samples) {
            Ok(0) => Duration::ZERO,
            Ok(samples) => self.total / samples,
            Err(_) => Duration::from_nanos((self.total.as_nanos() / u128::from(self.samples)) as u64),
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.samples += 1;
        self.total += elapsed;
        self.slowest = self.slowest.max(elapsed);
    }
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

fn record(label: &'static str, elapsed: Duration) {
    let mut timings = TIMINGS.lock();
    let timing = timings.entry(label).or_default();
    timing.add(elapsed);
    if timing.samples % REPORT_EVERY == 0 {
        tracing::debug!(
            target: "riptide::perf",
            label,
            samples = timing.samples,
            mean_us = timing.mean().as_micros() as u64,
            slowest_us = timing.slowest.as_micros() as u64,
            "timing"
        );
    }
}

/// Accumulated timing for `label`, if anything was recorded.
pub fn timing(label: &str) -> Option<Timing> {
    TIMINGS.lock().get(label).copied()
}

/// Records how long the enclosing scope took when `RIPTIDE_PERF` is set.
pub struct PerfGuard {
    label: &'static str,
    started: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        enabled().then(|| Self {
            label,
            started: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record(self.label, self.started.elapsed());
    }
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Crates whose targets follow the chosen level at debug and trace.
    const OWN_TARGETS: &[&str] = &["riptide", "riptide_core", "riptide_bus"];

    /// Transport crates held at info under trace unless `RIPTIDE_TRACE_DEPS` is set.
    const NOISY_DEPENDENCIES: &[&str] = &[
        "tokio_tungstenite",
        "tungstenite",
        "reqwest",
        "hyper",
        "hyper_util",
        "rustls",
        "h2",
        "mio",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl From<LogLevel> for LevelFilter {
        fn from(level: LogLevel) -> Self {
            match level {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        /// Append logs here instead of stderr.
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("cannot open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("a global tracing subscriber is already installed: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber once; later calls return `Ok` without
    /// touching it.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }
        let plan = FilterPlan::resolve(config.level);

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&plan.directives))
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;
        let _ = GUARD.set(guard);

        if plan.throttled {
            tracing::info!(
                target: "riptide::session",
                "dependency traces held at info; set RIPTIDE_TRACE_DEPS=1 or RIPTIDE_LOG_FILTER to see them"
            );
        }
        Ok(())
    }

    /// The `EnvFilter` directives for a run, and whether dependency noise was
    /// suppressed.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FilterPlan {
        directives: String,
        throttled: bool,
    }

    impl FilterPlan {
        fn resolve(level: LogLevel) -> Self {
            match std::env::var("RIPTIDE_LOG_FILTER") {
                Ok(directives) => Self {
                    directives,
                    throttled: false,
                },
                Err(_) => Self::for_level(level, super::env_flag("RIPTIDE_TRACE_DEPS")),
            }
        }

        fn for_level(level: LogLevel, allow_dependency_traces: bool) -> Self {
            let filter = LevelFilter::from(level);
            if level < LogLevel::Debug {
                return Self {
                    directives: filter.to_string().to_lowercase(),
                    throttled: false,
                };
            }

            let mut directives = String::from("info");
            for target in OWN_TARGETS {
                directives.push_str(&format!(",{target}={}", filter.to_string().to_lowercase()));
            }
            let throttled = level == LogLevel::Trace && !allow_dependency_traces;
            if throttled {
                for dependency in NOISY_DEPENDENCIES {
                    directives.push_str(&format!(",{dependency}=info"));
                }
            }
            Self { directives, throttled }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn quiet_levels_are_single_directives() {
            assert_eq!(FilterPlan::for_level(LogLevel::Warn, false).directives, "warn");
            assert_eq!(FilterPlan::for_level(LogLevel::Info, true).directives, "info");
        }

        #[test]
        fn debug_raises_only_riptide_targets() {
            let plan = FilterPlan::for_level(LogLevel::Debug, false);
            assert_eq!(
                plan.directives,
                "info,riptide=debug,riptide_core=debug,riptide_bus=debug"
            );
            assert!(!plan.throttled);
        }

        #[test]
        fn trace_holds_transport_crates_back_unless_allowed() {
            let plan = FilterPlan::for_level(LogLevel::Trace, false);
            assert!(plan.throttled);
            assert!(plan.directives.starts_with("info,riptide=trace"));
            assert!(plan.directives.contains(",tungstenite=info"));

            let plan = FilterPlan::for_level(LogLevel::Trace, true);
            assert!(!plan.throttled);
            assert!(!plan.directives.contains("tungstenite"));
        }

        #[test]
        fn warn_is_the_default_level() {
            assert_eq!(LogLevel::default(), LogLevel::Warn);
            assert_eq!(LevelFilter::from(LogLevel::Error), LevelFilter::ERROR);
        }
    }
}
