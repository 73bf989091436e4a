//! Priority calculation (C6), event-type normalization, and per-event derivation (C7) for
//! the tracemesh telemetry pipeline. Pure functions over [`tracemesh_types::Event`] plus
//! [`tracemesh_store::DerivedStore`]/[`tracemesh_metrics::MetricsStore`] handles -- no
//! stream or scheduling concerns live here, those belong to `tracemesh-runtime`.

mod derive;
mod normalize;
mod priority;

pub use derive::process_event;
pub use normalize::{classify, is_accepted_edit, EventClass};
pub use priority::calculate_priority;
