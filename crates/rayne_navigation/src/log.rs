//! The log sink a build reports its progress to, and per-stage timings.

use std::time::{Duration, Instant};

/// Severity of a build message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogCategory {
    /// Progress of a build that is going fine
    Progress,
    /// Something unexpected that did not stop the build
    Warning,
    /// A stage failed
    Error,
}

/// Receives the messages of a build.
///
/// Any `Fn(LogCategory, &str)` is a sink, so a closure collecting into a `RefCell<Vec<_>>` works
/// for capturing messages.
pub trait BuildLog {
    /// Handles one message.
    fn log(&self, category: LogCategory, message: &str);
}

impl<F> BuildLog for F
where
    F: Fn(LogCategory, &str),
{
    fn log(&self, category: LogCategory, message: &str) {
        self(category, message);
    }
}

/// Forwards build messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl BuildLog for TracingLog {
    fn log(&self, category: LogCategory, message: &str) {
        match category {
            LogCategory::Progress => tracing::info!("{message}"),
            LogCategory::Warning => tracing::warn!("{message}"),
            LogCategory::Error => tracing::error!("{message}"),
        }
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl BuildLog for NullLog {
    fn log(&self, _category: LogCategory, _message: &str) {}
}

/// The stages of a build that are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// The whole build
    Total,
    /// Collecting and rasterizing the input triangles
    Rasterization,
    /// Filtering unwalkable spans
    Filtering,
    /// Building the compact heightfield
    Compaction,
    /// Eroding the walkable area by the agent radius
    Erosion,
    /// Building the distance field for watershed partitioning
    DistanceField,
    /// Partitioning into regions
    Regions,
    /// Tracing contours
    Contours,
    /// Building the polygon mesh
    PolyMesh,
    /// Building the detail mesh
    DetailMesh,
    /// Compiling the runtime navigation mesh
    NavMesh,
}

impl TimerCategory {
    /// A short human readable name.
    pub fn label(self) -> &'static str {
        match self {
            TimerCategory::Total => "total",
            TimerCategory::Rasterization => "rasterization",
            TimerCategory::Filtering => "filtering",
            TimerCategory::Compaction => "compaction",
            TimerCategory::Erosion => "erosion",
            TimerCategory::DistanceField => "distance field",
            TimerCategory::Regions => "regions",
            TimerCategory::Contours => "contours",
            TimerCategory::PolyMesh => "polymesh",
            TimerCategory::DetailMesh => "detail mesh",
            TimerCategory::NavMesh => "navmesh",
        }
    }
}

/// How long each stage of the last build took, in the order the stages ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildTimings {
    entries: Vec<(TimerCategory, Duration)>,
}

impl BuildTimings {
    /// Runs `stage` and records its duration under `category`.
    pub fn time<T>(&mut self, category: TimerCategory, stage: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = stage();
        self.record(category, start.elapsed());
        result
    }

    /// Adds `duration` to the time recorded for `category`.
    pub fn record(&mut self, category: TimerCategory, duration: Duration) {
        match self.entries.iter_mut().find(|(c, _)| *c == category) {
            Some((_, total)) => *total += duration,
            None => self.entries.push((category, duration)),
        }
    }

    /// The time recorded for `category`, if that stage ran.
    pub fn get(&self, category: TimerCategory) -> Option<Duration> {
        self.entries
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, duration)| *duration)
    }

    /// All recorded stages in the order they ran.
    pub fn iter(&self) -> impl Iterator<Item = (TimerCategory, Duration)> + '_ {
        self.entries.iter().copied()
    }

    /// Writes one `Progress` line per stage to `log`.
    pub fn report(&self, log: &dyn BuildLog) {
        for (category, duration) in self.iter() {
            log.log(
                LogCategory::Progress,
                &format!(
                    " - {:<14} {:>8.2}ms",
                    category.label(),
                    duration.as_secs_f64() * 1000.0
                ),
            );
        }
    }
}
