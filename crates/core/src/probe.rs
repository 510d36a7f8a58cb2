use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use gpio_lines::OutputLine;
use tracing::error;

use crate::{
    actuation::{ActuationController, ActuationState},
    aggregator::{MetricsAggregator, panic_message},
    gate::InferenceControl,
    rate::RateEstimator,
    selector::{Selection, select},
    taxonomy::Taxonomy,
    types::FrameBatch,
};

/// What the streaming thread did with one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub fps: f64,
    /// `None` when the selection stage faulted and the frame was left untouched.
    pub selection: Option<Selection>,
    pub state: Option<ActuationState>,
    /// Whether the metrics snapshot took this frame.
    pub committed: bool,
    pub status: StatusLine,
}

/// One-line frame summary, as drawn on the on-screen overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusLine {
    pub frame: u64,
    pub objects: usize,
    pub fps: f64,
    pub infer_on: bool,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame {} | Objects: {} | FPS: {:.1} | Infer: {}",
            self.frame,
            self.objects,
            self.fps,
            if self.infer_on { "ON" } else { "OFF" }
        )
    }
}

/// Per-frame entry point of the decision layer.
///
/// Owned by the streaming thread. Stages run in order: throughput, selection,
/// actuation, metrics, then the frame's detections are cut down to the
/// selected one. Metrics see the unfiltered list.
pub struct FrameProbe<L: OutputLine> {
    rate: RateEstimator,
    taxonomy: Arc<Taxonomy>,
    actuator: ActuationController<L>,
    aggregator: MetricsAggregator,
    inference: Arc<dyn InferenceControl>,
}

impl<L: OutputLine> FrameProbe<L> {
    pub fn new(
        rate: RateEstimator,
        taxonomy: Arc<Taxonomy>,
        actuator: ActuationController<L>,
        aggregator: MetricsAggregator,
        inference: Arc<dyn InferenceControl>,
    ) -> Self {
        Self {
            rate,
            taxonomy,
            actuator,
            aggregator,
            inference,
        }
    }

    pub fn process(&mut self, batch: &mut FrameBatch, now: Instant) -> FrameOutcome {
        let fps = self.rate.record(batch.source_id, now);
        let status = StatusLine {
            frame: batch.frame_num,
            objects: batch.object_count,
            fps,
            infer_on: self.inference.is_running(),
        };

        let selection = self.select_stage(batch);
        let state = selection
            .as_ref()
            .map(|selection| self.actuator.actuate(selection));

        let committed = self
            .aggregator
            .aggregate(&batch.detections, fps, batch.frame_num);

        if let Some(selection) = selection.as_ref() {
            batch.retain_selection(selection);
        }

        FrameOutcome {
            fps,
            selection,
            state,
            committed,
            status,
        }
    }

    pub fn actuator(&self) -> &ActuationController<L> {
        &self.actuator
    }

    fn select_stage(&self, batch: &FrameBatch) -> Option<Selection> {
        let interest = &self.taxonomy.interest;
        match panic::catch_unwind(AssertUnwindSafe(|| select(&batch.detections, interest))) {
            Ok(selection) => Some(selection),
            Err(payload) => {
                error!(
                    frame = batch.frame_num,
                    source = batch.source_id,
                    "selection skipped: {}",
                    panic_message(&payload)
                );
                None
            }
        }
    }
}
