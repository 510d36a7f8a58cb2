//! Shared metrics snapshot.
//!
//! One [`MetricsSnapshot`] lives behind one mutex. The streaming thread
//! replaces every field of it, alerts included, inside a single critical
//! section per frame; readers clone it under the same lock. A reader therefore
//! never sees counts from one frame next to the fps or frame number of another.

use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::error;

use crate::{
    taxonomy::{Taxonomy, TrackedClass},
    types::Detection,
};

/// One entry of the alert log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    /// Wall-clock time in fractional seconds since the Unix epoch.
    pub t: f64,
    pub msg: String,
}

/// Insertion-ordered alert log that drops its oldest entries once full.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertLog {
    capacity: usize,
    entries: VecDeque<Alert>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(alert);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.entries.iter()
    }
}

impl Serialize for AlertLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}

/// Thresholds for the two alert rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertRules {
    /// Alert when the previous frame's fps is below this.
    pub low_fps: f64,
    /// Alert when the tracked counters sum to more than this.
    pub high_density: u64,
    /// Alert log capacity.
    pub capacity: usize,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            low_fps: 5.0,
            high_density: 10,
            capacity: 20,
        }
    }
}

/// Metrics exposed to the reporting endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub cows: u64,
    pub dogs: u64,
    pub sheep: u64,
    pub fps: f64,
    pub frame: u64,
    pub largest_animal: String,
    pub alerts: AlertLog,
}

impl MetricsSnapshot {
    pub fn new(alert_capacity: usize) -> Self {
        Self {
            total: 0,
            cows: 0,
            dogs: 0,
            sheep: 0,
            fps: 0.0,
            frame: 0,
            largest_animal: NO_ANIMAL.to_string(),
            alerts: AlertLog::new(alert_capacity),
        }
    }

    pub fn tracked_total(&self) -> u64 {
        self.cows + self.dogs + self.sheep
    }
}

const NO_ANIMAL: &str = "none";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("metrics snapshot lock poisoned")]
    Poisoned,
}

/// Cloneable handle on the snapshot, held by the aggregator and by readers.
#[derive(Clone, Debug)]
pub struct SharedSnapshot(Arc<Mutex<MetricsSnapshot>>);

impl SharedSnapshot {
    pub fn new(alert_capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(MetricsSnapshot::new(alert_capacity))))
    }

    /// Copy the snapshot out. The lock is released before this returns.
    pub fn read(&self) -> Result<MetricsSnapshot, AggregateError> {
        self.0
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| AggregateError::Poisoned)
    }
}

/// Counts computed from one frame before taking the lock.
#[derive(Debug, Default, PartialEq)]
struct FrameTally {
    total: u64,
    cows: u64,
    dogs: u64,
    sheep: u64,
    largest: Option<String>,
}

impl FrameTally {
    fn of(detections: &[Detection], taxonomy: &Taxonomy) -> Self {
        let mut tally = FrameTally::default();
        let mut largest_area = 0.0;
        for detection in detections {
            if detection.label.is_empty() {
                continue;
            }
            tally.total += 1;
            match taxonomy.counters.classify(&detection.label) {
                Some(TrackedClass::Cows) => tally.cows += 1,
                Some(TrackedClass::Dogs) => tally.dogs += 1,
                Some(TrackedClass::Sheep) => tally.sheep += 1,
                None => {}
            }
            if taxonomy.reportable.contains(&detection.label) {
                let area = detection.bbox.area();
                if area > largest_area {
                    largest_area = area;
                    tally.largest = Some(detection.label.clone());
                }
            }
        }
        tally
    }
}

/// Writer side of the metrics snapshot. Lives on the streaming thread.
pub struct MetricsAggregator {
    shared: SharedSnapshot,
    taxonomy: Arc<Taxonomy>,
    rules: AlertRules,
}

impl MetricsAggregator {
    pub fn new(shared: SharedSnapshot, taxonomy: Arc<Taxonomy>, rules: AlertRules) -> Self {
        Self {
            shared,
            taxonomy,
            rules,
        }
    }

    pub fn shared(&self) -> &SharedSnapshot {
        &self.shared
    }

    /// Fold one frame's unfiltered detections into the snapshot.
    ///
    /// Returns whether the snapshot was updated. Faults are logged and the
    /// frame is skipped; they never reach the caller.
    pub fn aggregate(&self, detections: &[Detection], fps: f64, frame: u64) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.try_aggregate(detections, fps, frame)
        }));
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(frame, "metrics update skipped: {err}");
                false
            }
            Err(payload) => {
                error!(frame, "metrics update panicked: {}", panic_message(&payload));
                false
            }
        }
    }

    fn try_aggregate(
        &self,
        detections: &[Detection],
        fps: f64,
        frame: u64,
    ) -> Result<(), AggregateError> {
        let tally = FrameTally::of(detections, &self.taxonomy);
        let tracked = tally.cows + tally.dogs + tally.sheep;

        let mut guard = match self.shared.0.lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.shared.0.clear_poison();
                return Err(AggregateError::Poisoned);
            }
        };

        let previous_fps = guard.fps;
        let mut raised = Vec::new();
        if previous_fps < self.rules.low_fps {
            raised.push(format!("Low FPS: {previous_fps:.1}"));
        }
        if tracked > self.rules.high_density {
            raised.push(format!("High density: {tracked} animals"));
        }

        let snapshot = &mut *guard;
        snapshot.total = tally.total;
        snapshot.cows = tally.cows;
        snapshot.dogs = tally.dogs;
        snapshot.sheep = tally.sheep;
        snapshot.fps = fps;
        snapshot.frame = frame;
        snapshot.largest_animal = tally.largest.unwrap_or_else(|| NO_ANIMAL.to_string());
        let now = unix_seconds();
        for msg in raised {
            snapshot.alerts.push(Alert { t: now, msg });
        }
        Ok(())
    }
}

fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::types::BBox;

    fn aggregator() -> MetricsAggregator {
        MetricsAggregator::new(
            SharedSnapshot::new(20),
            Arc::new(Taxonomy::default()),
            AlertRules::default(),
        )
    }

    fn det(label: &str, w: f32, h: f32) -> Detection {
        Detection::new(label, BBox::new(0.0, 0.0, w, h), 1)
    }

    fn messages(snapshot: &MetricsSnapshot) -> Vec<&str> {
        snapshot.alerts.iter().map(|a| a.msg.as_str()).collect()
    }

    #[test]
    fn counts_and_largest_over_unfiltered_frame() {
        let agg = aggregator();
        let dets = vec![
            det("cow", 10.0, 10.0),
            det("pig", 30.0, 10.0),
            det("person", 100.0, 100.0),
            det("sheep", 5.0, 5.0),
            det("", 1.0, 1.0),
        ];
        assert!(agg.aggregate(&dets, 30.0, 12));

        let snap = agg.shared().read().unwrap();
        assert_eq!(snap.total, 4);
        assert_eq!((snap.cows, snap.dogs, snap.sheep), (1, 1, 1));
        assert_eq!(snap.largest_animal, "pig");
        assert_eq!(snap.frame, 12);
        assert_eq!(snap.fps, 30.0);
    }

    #[test]
    fn empty_frame_resets_to_none() {
        let agg = aggregator();
        agg.aggregate(&[det("cow", 1.0, 1.0)], 30.0, 1);
        agg.aggregate(&[], 30.0, 2);

        let snap = agg.shared().read().unwrap();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.largest_animal, "none");
    }

    #[test]
    fn low_fps_uses_previous_frame() {
        let agg = aggregator();
        // Fresh snapshot starts at 0 fps.
        agg.aggregate(&[], 3.0, 1);
        assert_eq!(messages(&agg.shared().read().unwrap()), vec!["Low FPS: 0.0"]);

        agg.aggregate(&[], 30.0, 2);
        assert_eq!(
            messages(&agg.shared().read().unwrap()),
            vec!["Low FPS: 0.0", "Low FPS: 3.0"]
        );

        agg.aggregate(&[], 30.0, 3);
        assert_eq!(agg.shared().read().unwrap().alerts.len(), 2);
    }

    #[test]
    fn high_density_over_ten_tracked() {
        let agg = aggregator();
        agg.aggregate(&[], 30.0, 1);
        let before = agg.shared().read().unwrap().alerts.len();

        let ten: Vec<Detection> = (0..10).map(|_| det("sheep", 1.0, 1.0)).collect();
        agg.aggregate(&ten, 30.0, 2);
        assert_eq!(agg.shared().read().unwrap().alerts.len(), before);

        let mut eleven = ten.clone();
        eleven.push(det("cow", 1.0, 1.0));
        eleven.push(det("horse", 1.0, 1.0));
        agg.aggregate(&eleven, 30.0, 3);
        let snap = agg.shared().read().unwrap();
        assert_eq!(messages(&snap).last(), Some(&"High density: 11 animals"));
        assert_eq!(snap.tracked_total(), 11);
        assert_eq!(snap.total, 12);
    }

    #[test]
    fn alert_log_keeps_most_recent() {
        let agg = aggregator();
        for frame in 0..25 {
            // every fps here is under the low-fps threshold
            agg.aggregate(&[], frame as f64 / 10.0, frame);
        }

        let snap = agg.shared().read().unwrap();
        assert_eq!(snap.alerts.len(), 20);
        let expected: Vec<String> = (4..24)
            .map(|frame| format!("Low FPS: {:.1}", frame as f64 / 10.0))
            .collect();
        assert_eq!(messages(&snap), expected);
    }

    #[test]
    fn poisoned_lock_skips_one_frame() {
        let agg = aggregator();
        let shared = agg.shared().clone();
        let _ = thread::spawn(move || {
            let _guard = shared.0.lock().unwrap();
            panic!("poison the snapshot");
        })
        .join();

        assert!(!agg.aggregate(&[det("cow", 1.0, 1.0)], 30.0, 5));
        assert!(agg.aggregate(&[det("cow", 1.0, 1.0)], 30.0, 6));
        assert_eq!(agg.shared().read().unwrap().frame, 6);
    }

    #[test]
    fn json_shape() {
        let agg = aggregator();
        agg.aggregate(&[det("cow", 2.0, 2.0)], 2.5, 9);
        let json = serde_json::to_value(agg.shared().read().unwrap()).unwrap();

        assert_eq!(json["total"], 1);
        assert_eq!(json["cows"], 1);
        assert_eq!(json["dogs"], 0);
        assert_eq!(json["sheep"], 0);
        assert_eq!(json["fps"], 2.5);
        assert_eq!(json["frame"], 9);
        assert_eq!(json["largest_animal"], "cow");
        assert_eq!(json["alerts"][0]["msg"], "Low FPS: 0.0");
        assert!(json["alerts"][0]["t"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn readers_never_see_mixed_frames() {
        let agg = aggregator();
        let shared = agg.shared().clone();
        let reader = thread::spawn(move || {
            for _ in 0..5_000 {
                let snap = shared.read().unwrap();
                // frame k carries k % 13 cows at k fps
                assert_eq!(snap.fps as u64, snap.frame);
                assert_eq!(snap.cows, snap.frame % 13);
                assert_eq!(snap.total, snap.cows);
            }
        });

        for frame in 1..=5_000u64 {
            let dets: Vec<Detection> = (0..frame % 13).map(|_| det("cow", 1.0, 1.0)).collect();
            agg.aggregate(&dets, frame as f64, frame);
        }
        reader.join().unwrap();
    }
}
