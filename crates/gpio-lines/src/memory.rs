use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{InputLine, Level, LineError, LineId, OutputLine};

/// In-process line. Clones share the same level, so one handle can be handed
/// to the component under test and another kept to observe or stimulate it.
#[derive(Clone, Debug)]
pub struct MemoryLine {
    id: LineId,
    high: Arc<AtomicBool>,
}

impl MemoryLine {
    pub fn new(id: LineId, initial: Level) -> Self {
        Self {
            id,
            high: Arc::new(AtomicBool::new(initial.is_high())),
        }
    }

    /// Current level without going through the trait.
    pub fn get(&self) -> Level {
        Level::from_high(self.high.load(Ordering::SeqCst))
    }

    /// Force the level from outside, e.g. to simulate an external signal on an input.
    pub fn drive(&self, level: Level) {
        self.high.store(level.is_high(), Ordering::SeqCst);
    }
}

impl OutputLine for MemoryLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn set_level(&mut self, level: Level) -> Result<(), LineError> {
        self.drive(level);
        Ok(())
    }
}

impl InputLine for MemoryLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn level(&self) -> Result<Level, LineError> {
        Ok(self.get())
    }
}
