use crate::{
    taxonomy::ClassSet,
    types::{Detection, FrameBatch},
};

/// Outcome of dominant-entity selection for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub label: Option<String>,
    pub area: f64,
    index: Option<usize>,
}

impl Selection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_some(&self) -> bool {
        self.label.is_some()
    }
}

/// Pick the largest-area detection whose label is in `interest`.
///
/// Ties keep the first detection in input order. The running maximum starts at
/// zero, so degenerate boxes are never selected.
pub fn select(detections: &[Detection], interest: &ClassSet) -> Selection {
    let mut best = Selection::none();
    for (index, detection) in detections.iter().enumerate() {
        if !interest.contains(&detection.label) {
            continue;
        }
        let area = detection.bbox.area();
        if area > best.area {
            best = Selection {
                label: Some(detection.label.clone()),
                area,
                index: Some(index),
            };
        }
    }
    best
}

impl FrameBatch {
    /// Keep only the detection `selection` refers to and set the reported
    /// object count to 1, or drop everything and report 0 when nothing was
    /// selected.
    ///
    /// `selection` must come from [`select`] over this frame's current
    /// detections. Runs at most once per frame; later calls are no-ops.
    pub fn retain_selection(&mut self, selection: &Selection) {
        if self.filtered {
            return;
        }
        self.filtered = true;

        let kept: Vec<Detection> = selection
            .index
            .and_then(|index| self.detections.get(index))
            .filter(|detection| selection.label() == Some(detection.label.as_str()))
            .cloned()
            .into_iter()
            .collect();

        self.object_count = kept.len();
        self.detections = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{taxonomy::Taxonomy, types::BBox};

    fn det(label: &str, w: f32, h: f32) -> Detection {
        Detection::new(label, BBox::new(0.0, 0.0, w, h), 42)
    }

    fn interest() -> ClassSet {
        Taxonomy::default().interest
    }

    #[test]
    fn largest_area_wins() {
        let dets = vec![det("cow", 10.0, 10.0), det("sheep", 25.0, 10.0)];
        let selection = select(&dets, &interest());
        assert_eq!(selection.label(), Some("sheep"));
        assert_eq!(selection.area, 250.0);
    }

    #[test]
    fn ties_keep_first_seen() {
        let dets = vec![det("sheep", 15.0, 10.0), det("cow", 10.0, 15.0)];
        let selection = select(&dets, &interest());
        assert_eq!(selection.label(), Some("sheep"));
        assert_eq!(selection.area, 150.0);
    }

    #[test]
    fn uninteresting_labels_are_ignored() {
        let dets = vec![det("person", 100.0, 100.0), det("horse", 2.0, 3.0)];
        let selection = select(&dets, &interest());
        assert_eq!(selection.label(), Some("horse"));
        assert_eq!(selection.area, 6.0);
    }

    #[test]
    fn empty_and_zero_area_select_nothing() {
        assert_eq!(select(&[], &interest()), Selection::none());
        assert!(!select(&[det("cow", 0.0, 10.0)], &interest()).is_some());
    }

    #[test]
    fn retain_keeps_only_selected() {
        let mut batch = FrameBatch::new(
            0,
            42,
            vec![det("person", 50.0, 50.0), det("cow", 10.0, 10.0), det("sheep", 2.0, 2.0)],
        );
        let selection = select(&batch.detections, &interest());
        batch.retain_selection(&selection);

        assert_eq!(batch.object_count, 1);
        assert_eq!(batch.detections, vec![det("cow", 10.0, 10.0)]);
        assert!(batch.is_filtered());
    }

    #[test]
    fn retain_without_selection_clears_frame() {
        let mut batch = FrameBatch::new(0, 7, vec![det("person", 50.0, 50.0)]);
        let selection = select(&batch.detections, &interest());
        batch.retain_selection(&selection);

        assert_eq!(batch.object_count, 0);
        assert!(batch.detections.is_empty());
    }

    #[test]
    fn retain_runs_once_per_frame() {
        let mut batch = FrameBatch::new(
            0,
            9,
            vec![det("sheep", 1.0, 1.0), det("cow", 4.0, 4.0)],
        );
        let selection = select(&batch.detections, &interest());
        batch.retain_selection(&selection);
        let after_first = batch.clone();

        batch.retain_selection(&selection);
        assert_eq!(batch, after_first);
        assert_eq!(select(&batch.detections, &interest()).label(), Some("cow"));
    }

    #[test]
    fn retain_on_empty_frame() {
        let mut batch = FrameBatch::new(2, 1, Vec::new());
        batch.retain_selection(&select(&batch.detections, &interest()));
        assert_eq!(batch.object_count, 0);
    }
}
