//! Decision layer sitting downstream of the perception pipeline.
//!
//! Every rendered frame flows through [`FrameProbe::process`] on the streaming
//! thread: the throughput estimate is refreshed, the dominant entity is chosen
//! and every other detection dropped, the output lines are driven, and the
//! shared metrics snapshot is updated. The inference gate runs beside it on
//! the interrupt side and only touches atomics.
//!
//! - `types`: detections and frame batches as delivered by the pipeline.
//! - `taxonomy`: which labels matter for selection, actuation and counting.
//! - `rate`: per-source sliding-window fps.
//! - `selector`: dominant-entity selection and frame filtering.
//! - `actuation`: selection to output-line mapping.
//! - `gate`: inference on/off control driven by an input line.
//! - `aggregator`: the shared metrics snapshot and its alert log.
//! - `probe`: the per-frame entry point tying the stages together.

pub mod actuation;
pub mod aggregator;
pub mod gate;
pub mod probe;
pub mod rate;
pub mod selector;
pub mod taxonomy;
pub mod types;

pub use actuation::{ActuationController, ActuationState};
pub use aggregator::{
    AggregateError, Alert, AlertLog, AlertRules, MetricsAggregator, MetricsSnapshot,
    SharedSnapshot,
};
pub use gate::{DISABLED_INTERVAL, GateState, InferenceControl, InferenceGate, SkipInterval};
pub use probe::{FrameOutcome, FrameProbe, StatusLine};
pub use rate::{DEFAULT_WINDOW, RateEstimator};
pub use selector::{Selection, select};
pub use taxonomy::{ActuationLabels, ClassSet, CounterLabels, Taxonomy, TaxonomyError, TrackedClass};
pub use types::{BBox, Detection, FrameBatch};
