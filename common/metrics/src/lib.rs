//! A thin wrapper around the `prometheus` crate.
//!
//! Metrics are declared as `LazyLock` statics wrapping a `Result`: a metric
//! that fails to register (e.g., a duplicate name) is simply never updated,
//! it can never panic or return an error at the call site.
//!
//! ## Example
//!
//! ```rust
//! use metrics::*;
//! use std::sync::LazyLock;
//!
//! static RUN_COUNT: LazyLock<Result<IntCounter>> =
//!     LazyLock::new(|| try_create_int_counter("runs_total", "Total runs"));
//!
//! inc_counter(&RUN_COUNT);
//! ```

use prometheus::{HistogramOpts, Opts};

pub use prometheus::{Error, Histogram, HistogramTimer, IntCounter, IntGauge, Result};

/// Attempts to create an `IntCounter`, returning `Err` if the registry does not accept the counter
/// (potentially due to naming conflict).
pub fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter> {
    let opts = Opts::new(name, help);
    let counter = IntCounter::with_opts(opts)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Attempts to create an `IntGauge`, returning `Err` if the registry does not accept the gauge
/// (potentially due to naming conflict).
pub fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let opts = Opts::new(name, help);
    let gauge = IntGauge::with_opts(opts)?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Attempts to create a `Histogram`, returning `Err` if the registry does not accept the histogram
/// (potentially due to naming conflict).
pub fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let opts = HistogramOpts::new(name, help);
    let histogram = Histogram::with_opts(opts)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

/// Starts a timer for the given `Histogram`, stopping it and observing the duration when dropped.
pub fn start_timer(histogram: &Result<Histogram>) -> Option<HistogramTimer> {
    histogram.as_ref().ok().map(Histogram::start_timer)
}

/// Stops a timer created with `start_timer`, observing the duration immediately.
pub fn stop_timer(timer: Option<HistogramTimer>) {
    if let Some(timer) = timer {
        timer.observe_duration();
    }
}

pub fn inc_counter(counter: &Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn inc_counter_by(counter: &Result<IntCounter>, value: u64) {
    if let Ok(counter) = counter {
        counter.inc_by(value);
    }
}

pub fn set_gauge(gauge: &Result<IntGauge>, value: i64) {
    if let Ok(gauge) = gauge {
        gauge.set(value);
    }
}

pub fn observe(histogram: &Result<Histogram>, value: f64) {
    if let Ok(histogram) = histogram {
        histogram.observe(value);
    }
}
