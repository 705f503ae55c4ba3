pub mod bindings;
pub mod metrics;

pub use bindings::{
    assigned_names, declared_names, is_referenced_outside, reference_counts, ReferenceCounts,
};
pub use metrics::{collect_metrics, compare, Metrics};
