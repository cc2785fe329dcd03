//! process wide client configuration.
//!
//! a [Config] is constructed explicitly (builder methods or a key=value
//! parameter string), loaded once and stays immutable for the run. every
//! pipeline component receives the configuration it needs at construction;
//! nothing reads ambient global state.

use core::{str, time::Duration};

use crate::error::{ConfigError, Error};

/// direction shape of a streaming rpc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamMode {
    /// single direction stream. ingestion acks arrive at stream termination.
    Unidirectional,
    /// cursor driven stream. responses are paced by the forward side.
    Bidirectional,
}

/// capacity regime of a bounded message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// bounded by queued message count.
    Count(usize),
    /// bounded by the sum of queued message byte sizes.
    Allocation(usize),
}

/// verbosity of the optional pipeline logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

/// per pipeline settings shared by the query and ingestion sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionConfig {
    pub(crate) timeout: Duration,
    pub(crate) logging_enabled: bool,
    pub(crate) logging_level: LogLevel,
    pub(crate) concurrency_enabled: bool,
    pub(crate) max_threads: usize,
    pub(crate) pivot_size: usize,
    pub(crate) buffer_capacity: Capacity,
    pub(crate) backpressure: bool,
}

impl SectionConfig {
    const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            logging_enabled: false,
            logging_level: LogLevel::Debug,
            concurrency_enabled: true,
            max_threads: 4,
            pivot_size: 16,
            buffer_capacity: Capacity::Count(1024),
            backpressure: true,
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    #[inline]
    pub fn logging_level(&self) -> LogLevel {
        self.logging_level
    }

    #[inline]
    pub fn concurrency_enabled(&self) -> bool {
        self.concurrency_enabled
    }

    /// upper bound on worker tasks of this pipeline side.
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// minimum work set cardinality at which parallel processing is used.
    #[inline]
    pub fn pivot_size(&self) -> usize {
        self.pivot_size
    }

    #[inline]
    pub fn buffer_capacity(&self) -> Capacity {
        self.buffer_capacity
    }

    #[inline]
    pub fn backpressure(&self) -> bool {
        self.backpressure
    }
}

/// client configuration for both data plane pipelines.
///
/// # Examples
/// ```rust
/// use strata_client::Config;
///
/// // parameter string form. unknown keys are rejected.
/// let cfg = Config::try_from(
///     "query.timeout.limit=10 query.timeout.unit=s ingestion.stream.count=4"
/// ).unwrap();
/// assert_eq!(cfg.ingestion_stream_count(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) query: SectionConfig,
    pub(crate) ingestion: SectionConfig,
    pub(crate) ingestion_stream_count: usize,
    pub(crate) ingestion_stream_mode: StreamMode,
    pub(crate) query_stream_mode: StreamMode,
    pub(crate) decompose_max_bytes: usize,
    pub(crate) worker_count: usize,
    pub(crate) backpressure_mirror: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            query: SectionConfig::new(),
            ingestion: SectionConfig::new(),
            ingestion_stream_count: 1,
            ingestion_stream_mode: StreamMode::Bidirectional,
            query_stream_mode: StreamMode::Unidirectional,
            decompose_max_bytes: 4 * 1024 * 1024,
            worker_count: 1,
            backpressure_mirror: true,
        }
    }

    #[inline]
    pub fn query(&self) -> &SectionConfig {
        &self.query
    }

    #[inline]
    pub fn ingestion(&self) -> &SectionConfig {
        &self.ingestion
    }

    /// number of parallel forward streams the ingestion transmitter opens.
    #[inline]
    pub fn ingestion_stream_count(&self) -> usize {
        self.ingestion_stream_count
    }

    #[inline]
    pub fn ingestion_stream_mode(&self) -> StreamMode {
        self.ingestion_stream_mode
    }

    #[inline]
    pub fn query_stream_mode(&self) -> StreamMode {
        self.query_stream_mode
    }

    /// maximum serialized size of one decomposed frame piece. zero disables
    /// decomposition.
    #[inline]
    pub fn decompose_max_bytes(&self) -> usize {
        self.decompose_max_bytes
    }

    /// frame processor worker count. zero or one selects serial processing.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// whether transmission buffer fullness propagates into the caller side
    /// `ingest` call.
    #[inline]
    pub fn backpressure_mirror(&self) -> bool {
        self.backpressure_mirror
    }

    pub fn query_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.query.timeout = timeout;
        self
    }

    pub fn ingestion_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.ingestion.timeout = timeout;
        self
    }

    pub fn query_logging(&mut self, enabled: bool, level: LogLevel) -> &mut Self {
        self.query.logging_enabled = enabled;
        self.query.logging_level = level;
        self
    }

    pub fn ingestion_logging(&mut self, enabled: bool, level: LogLevel) -> &mut Self {
        self.ingestion.logging_enabled = enabled;
        self.ingestion.logging_level = level;
        self
    }

    pub fn query_concurrency(&mut self, enabled: bool, max_threads: usize, pivot_size: usize) -> &mut Self {
        self.query.concurrency_enabled = enabled;
        self.query.max_threads = max_threads;
        self.query.pivot_size = pivot_size;
        self
    }

    pub fn ingestion_concurrency(&mut self, enabled: bool, max_threads: usize, pivot_size: usize) -> &mut Self {
        self.ingestion.concurrency_enabled = enabled;
        self.ingestion.max_threads = max_threads;
        self.ingestion.pivot_size = pivot_size;
        self
    }

    pub fn query_buffer_capacity(&mut self, capacity: Capacity) -> &mut Self {
        self.query.buffer_capacity = capacity;
        self
    }

    pub fn ingestion_buffer_capacity(&mut self, capacity: Capacity) -> &mut Self {
        self.ingestion.buffer_capacity = capacity;
        self
    }

    pub fn ingestion_backpressure(&mut self, enabled: bool) -> &mut Self {
        self.ingestion.backpressure = enabled;
        self
    }

    pub fn mirror_backpressure(&mut self, enabled: bool) -> &mut Self {
        self.backpressure_mirror = enabled;
        self
    }

    pub fn stream_count(&mut self, count: usize) -> &mut Self {
        self.ingestion_stream_count = count.max(1);
        self
    }

    pub fn stream_mode(&mut self, mode: StreamMode) -> &mut Self {
        self.ingestion_stream_mode = mode;
        self
    }

    pub fn query_mode(&mut self, mode: StreamMode) -> &mut Self {
        self.query_stream_mode = mode;
        self
    }

    pub fn max_decomposed_bytes(&mut self, bytes: usize) -> &mut Self {
        self.decompose_max_bytes = bytes;
        self
    }

    pub fn workers(&mut self, count: usize) -> &mut Self {
        self.worker_count = count;
        self
    }

    fn param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        // timeout units are applied in a second pass so `limit` and `unit`
        // may appear in either order.
        match key {
            "query.timeout.limit" => {
                self.query.timeout = parse_duration_limit(value, self.query.timeout).ok_or_else(invalid)?;
            }
            "query.timeout.unit" => {
                self.query.timeout = parse_duration_unit(value, self.query.timeout).ok_or_else(invalid)?;
            }
            "query.logging.enabled" => self.query.logging_enabled = parse_bool(value).ok_or_else(invalid)?,
            "query.logging.level" => self.query.logging_level = parse_level(value).ok_or_else(invalid)?,
            "query.concurrency.enabled" => self.query.concurrency_enabled = parse_bool(value).ok_or_else(invalid)?,
            "query.concurrency.max_threads" => {
                self.query.max_threads = value.parse().ok().filter(|n| *n > 0).ok_or_else(invalid)?;
            }
            "query.concurrency.pivot_size" => self.query.pivot_size = value.parse().map_err(|_| invalid())?,
            "query.buffer.capacity" => {
                self.query.buffer_capacity = Capacity::Count(value.parse().map_err(|_| invalid())?);
            }
            "query.buffer.allocation" => {
                self.query.buffer_capacity = Capacity::Allocation(value.parse().map_err(|_| invalid())?);
            }
            "query.stream.mode" => self.query_stream_mode = parse_mode(value).ok_or_else(invalid)?,
            "ingestion.timeout.limit" => {
                self.ingestion.timeout = parse_duration_limit(value, self.ingestion.timeout).ok_or_else(invalid)?;
            }
            "ingestion.timeout.unit" => {
                self.ingestion.timeout = parse_duration_unit(value, self.ingestion.timeout).ok_or_else(invalid)?;
            }
            "ingestion.logging.enabled" => self.ingestion.logging_enabled = parse_bool(value).ok_or_else(invalid)?,
            "ingestion.logging.level" => self.ingestion.logging_level = parse_level(value).ok_or_else(invalid)?,
            "ingestion.concurrency.enabled" => {
                self.ingestion.concurrency_enabled = parse_bool(value).ok_or_else(invalid)?;
            }
            "ingestion.concurrency.max_threads" => {
                self.ingestion.max_threads = value.parse().ok().filter(|n| *n > 0).ok_or_else(invalid)?;
            }
            "ingestion.concurrency.pivot_size" => self.ingestion.pivot_size = value.parse().map_err(|_| invalid())?,
            "ingestion.buffer.capacity" => {
                self.ingestion.buffer_capacity = Capacity::Count(value.parse().map_err(|_| invalid())?);
            }
            "ingestion.buffer.allocation" => {
                self.ingestion.buffer_capacity = Capacity::Allocation(value.parse().map_err(|_| invalid())?);
            }
            "ingestion.backpressure.enabled" => self.ingestion.backpressure = parse_bool(value).ok_or_else(invalid)?,
            "ingestion.backpressure.mirror" => self.backpressure_mirror = parse_bool(value).ok_or_else(invalid)?,
            "ingestion.stream.count" => {
                self.ingestion_stream_count = value.parse().ok().filter(|n| *n >= 1).ok_or_else(invalid)?;
            }
            "ingestion.stream.mode" => self.ingestion_stream_mode = parse_mode(value).ok_or_else(invalid)?,
            "ingestion.decompose.max_bytes" => self.decompose_max_bytes = value.parse().map_err(|_| invalid())?,
            "ingestion.workers" => self.worker_count = value.parse().map_err(|_| invalid())?,
            _ => return Err(ConfigError::UnknownParam(key.to_string())),
        }
        Ok(())
    }
}

// the stored duration keeps the raw limit in its current unit. `limit` scales
// the count, `unit` rescales an already parsed count.
fn parse_duration_limit(value: &str, current: Duration) -> Option<Duration> {
    let limit: u64 = value.parse().ok()?;
    let unit = unit_of(current);
    Some(duration_from(limit, unit))
}

fn parse_duration_unit(value: &str, current: Duration) -> Option<Duration> {
    let limit = count_of(current);
    match value {
        "ns" | "us" | "ms" | "s" | "m" => Some(duration_from(limit, value)),
        _ => None,
    }
}

fn duration_from(limit: u64, unit: &str) -> Duration {
    match unit {
        "ns" => Duration::from_nanos(limit),
        "us" => Duration::from_micros(limit),
        "ms" => Duration::from_millis(limit),
        "m" => Duration::from_secs(limit * 60),
        _ => Duration::from_secs(limit),
    }
}

fn unit_of(d: Duration) -> &'static str {
    if d.subsec_nanos() % 1_000 != 0 {
        "ns"
    } else if d.subsec_micros() % 1_000 != 0 {
        "us"
    } else if d.subsec_millis() != 0 {
        "ms"
    } else {
        "s"
    }
}

fn count_of(d: Duration) -> u64 {
    match unit_of(d) {
        "ns" => d.as_nanos() as u64,
        "us" => d.as_micros() as u64,
        "ms" => d.as_millis() as u64,
        _ => d.as_secs(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_level(value: &str) -> Option<LogLevel> {
    match value {
        "error" => Some(LogLevel::Error),
        "warn" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => None,
    }
}

fn parse_mode(value: &str) -> Option<StreamMode> {
    match value {
        "uni" | "unidirectional" => Some(StreamMode::Unidirectional),
        "bidi" | "bidirectional" => Some(StreamMode::Bidirectional),
        _ => None,
    }
}

impl str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cfg = Config::new();
        for pair in s.split_whitespace() {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::MissingValue(pair.to_string()))?;
            if value.is_empty() {
                return Err(ConfigError::MissingValue(key.to_string()).into());
            }
            cfg.param(key, value)?;
        }
        Ok(cfg)
    }
}

impl TryFrom<&str> for Config {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for Config {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.as_str().parse()
    }
}
