pub mod metrics;
pub mod natural_sort;

// Re-export commonly used items
pub use metrics::{Metrics, MetricsSnapshot, Stage};
pub use natural_sort::{natural_cmp, sort_natural_by_key};
