mod collector;

pub use collector::{ConnectionOutcome, MetricsCollector, MetricsRegistry};
