//! Common types for metrics definitions. Each crate declares its metrics as
//! `MetricDef` constants and registers them through `describe_all`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
}

/// Registers the descriptions of a crate's metric table with the installed
/// recorder. Call once at startup, after the recorder is set.
pub fn describe_all(defs: &[MetricDef]) {
    for def in defs {
        match def.kind {
            MetricKind::Counter => metrics::describe_counter!(def.name, def.description),
            MetricKind::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricKind::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}
