//! Selection to output-line mapping.
//!
//! Three output lines, one per actuated class. A line is active when driven
//! LOW. At most one line is active at any time.

use gpio_lines::{Level, OutputLine};
use tracing::warn;

use crate::{selector::Selection, taxonomy::ActuationLabels};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActuationState {
    Idle,
    ClassA,
    ClassB,
    ClassC,
}

impl ActuationState {
    /// Index of the line asserted in this state.
    pub fn active_channel(self) -> Option<usize> {
        match self {
            ActuationState::Idle => None,
            ActuationState::ClassA => Some(0),
            ActuationState::ClassB => Some(1),
            ActuationState::ClassC => Some(2),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActuationState::Idle => "idle",
            ActuationState::ClassA => "class_a",
            ActuationState::ClassB => "class_b",
            ActuationState::ClassC => "class_c",
        }
    }

    /// Levels for lines A, B and C.
    pub fn levels(self) -> [Level; 3] {
        let mut levels = [Level::High; 3];
        if let Some(channel) = self.active_channel() {
            levels[channel] = Level::Low;
        }
        levels
    }
}

impl ActuationLabels {
    pub fn state_for(&self, label: Option<&str>) -> ActuationState {
        match label {
            Some(label) if label == self.a => ActuationState::ClassA,
            Some(label) if label == self.b => ActuationState::ClassB,
            Some(label) if label == self.c => ActuationState::ClassC,
            _ => ActuationState::Idle,
        }
    }
}

/// Drives the three output lines from each frame's selection.
///
/// Holds no state between frames; every call re-derives all three levels from
/// the selection alone.
pub struct ActuationController<L: OutputLine> {
    lines: [L; 3],
    labels: ActuationLabels,
}

impl<L: OutputLine> ActuationController<L> {
    /// Take ownership of lines A, B and C and drive them all inactive.
    pub fn new(lines: [L; 3], labels: ActuationLabels) -> Self {
        let mut controller = Self { lines, labels };
        controller.apply(ActuationState::Idle);
        controller
    }

    /// Drive the lines for `selection` and return the state actually reached.
    pub fn actuate(&mut self, selection: &Selection) -> ActuationState {
        let state = self.labels.state_for(selection.label());
        self.apply(state)
    }

    pub fn lines(&self) -> &[L; 3] {
        &self.lines
    }

    /// De-assert before asserting so two lines are never active together. A
    /// line that could not be de-asserted may still be active, so the target
    /// line stays inactive and the outcome is [`ActuationState::Idle`].
    fn apply(&mut self, state: ActuationState) -> ActuationState {
        let mut deasserted = true;
        for channel in (0..3).filter(|channel| Some(*channel) != state.active_channel()) {
            deasserted &= self.drive(channel, Level::High, state);
        }

        match state.active_channel() {
            None => ActuationState::Idle,
            Some(channel) if !deasserted => {
                warn!(
                    "not asserting {} for {}: another line may still be active",
                    self.lines[channel].id(),
                    state.label()
                );
                ActuationState::Idle
            }
            Some(channel) if self.drive(channel, Level::Low, state) => state,
            Some(_) => ActuationState::Idle,
        }
    }

    fn drive(&mut self, channel: usize, level: Level, state: ActuationState) -> bool {
        let line = &mut self.lines[channel];
        match line.set_level(level) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to drive {} {level} for {}: {err}", line.id(), state.label());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use gpio_lines::{LineError, LineId, MemoryLine};

    use super::*;
    use crate::{
        selector::select,
        taxonomy::Taxonomy,
        types::{BBox, Detection},
    };

    fn memory_lines() -> [MemoryLine; 3] {
        [29, 31, 33].map(|pin| MemoryLine::new(LineId(pin), Level::Low))
    }

    fn selection_of(label: &str) -> Selection {
        let dets = vec![Detection::new(label, BBox::new(0.0, 0.0, 4.0, 4.0), 1)];
        let interest = [label].into_iter().collect();
        select(&dets, &interest)
    }

    fn levels(lines: &[MemoryLine; 3]) -> [Level; 3] {
        [lines[0].get(), lines[1].get(), lines[2].get()]
    }

    #[test]
    fn construction_drives_all_inactive() {
        let observers = memory_lines();
        let _controller = ActuationController::new(observers.clone(), ActuationLabels::default());
        assert_eq!(levels(&observers), [Level::High; 3]);
    }

    #[test]
    fn each_class_asserts_exactly_its_line() {
        let observers = memory_lines();
        let mut controller =
            ActuationController::new(observers.clone(), Taxonomy::default().actuation);

        let cases = [
            ("cow", ActuationState::ClassA, [Level::Low, Level::High, Level::High]),
            ("sheep", ActuationState::ClassB, [Level::High, Level::Low, Level::High]),
            ("horse", ActuationState::ClassC, [Level::High, Level::High, Level::Low]),
        ];
        for (label, state, expected) in cases {
            assert_eq!(controller.actuate(&selection_of(label)), state);
            assert_eq!(levels(&observers), expected, "label {label}");
        }

        assert_eq!(controller.actuate(&Selection::none()), ActuationState::Idle);
        assert_eq!(levels(&observers), [Level::High; 3]);
    }

    #[test]
    fn unmapped_label_is_idle() {
        let observers = memory_lines();
        let mut controller = ActuationController::new(observers.clone(), ActuationLabels::default());
        controller.actuate(&selection_of("cow"));
        assert_eq!(controller.actuate(&selection_of("pig")), ActuationState::Idle);
        assert_eq!(levels(&observers), [Level::High; 3]);
    }

    /// Records every write into a log shared by all three lines.
    struct Recording {
        id: LineId,
        channel: usize,
        log: Arc<Mutex<Vec<(usize, Level)>>>,
        fail: Arc<AtomicBool>,
    }

    impl OutputLine for Recording {
        fn id(&self) -> LineId {
            self.id
        }

        fn set_level(&mut self, level: Level) -> Result<(), LineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LineError::InvalidLevel {
                    line: self.id,
                    value: "unwritable".into(),
                });
            }
            self.log.lock().unwrap().push((self.channel, level));
            Ok(())
        }
    }

    fn recording(log: &Arc<Mutex<Vec<(usize, Level)>>>, failing: Option<usize>) -> [Recording; 3] {
        [0, 1, 2].map(|channel| Recording {
            id: LineId(channel as u32),
            channel,
            log: log.clone(),
            fail: Arc::new(AtomicBool::new(failing == Some(channel))),
        })
    }

    fn assert_never_two_active(log: &[(usize, Level)]) {
        let mut current = [Level::High; 3];
        for (channel, level) in log {
            current[*channel] = *level;
            let active = current.iter().filter(|l| **l == Level::Low).count();
            assert!(active <= 1, "two lines active: {current:?}");
        }
    }

    #[test]
    fn never_two_lines_active() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = ActuationController::new(recording(&log, None), ActuationLabels::default());
        for label in ["cow", "sheep", "horse", "cow", "pig", "horse"] {
            controller.actuate(&selection_of(label));
        }

        assert_never_two_active(&log.lock().unwrap());
    }

    #[test]
    fn failed_target_line_reports_idle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut controller =
            ActuationController::new(recording(&log, Some(2)), ActuationLabels::default());
        log.lock().unwrap().clear();

        assert_eq!(controller.actuate(&selection_of("horse")), ActuationState::Idle);
        assert_eq!(*log.lock().unwrap(), vec![(0, Level::High), (1, Level::High)]);

        assert_eq!(controller.actuate(&selection_of("cow")), ActuationState::Idle);
        assert_eq!(controller.actuate(&Selection::none()), ActuationState::Idle);
    }

    #[test]
    fn stuck_active_line_blocks_the_next_assert() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lines = recording(&log, None);
        let line_a = lines[0].fail.clone();
        let mut controller = ActuationController::new(lines, ActuationLabels::default());

        assert_eq!(controller.actuate(&selection_of("cow")), ActuationState::ClassA);
        line_a.store(true, Ordering::SeqCst);

        assert_eq!(controller.actuate(&selection_of("sheep")), ActuationState::Idle);
        assert_eq!(controller.actuate(&selection_of("horse")), ActuationState::Idle);
        let writes = log.lock().unwrap().clone();
        assert!(!writes.contains(&(1, Level::Low)));
        assert!(!writes.contains(&(2, Level::Low)));
        assert_never_two_active(&writes);

        line_a.store(false, Ordering::SeqCst);
        assert_eq!(controller.actuate(&selection_of("sheep")), ActuationState::ClassB);
        assert_never_two_active(&log.lock().unwrap());
    }
}
