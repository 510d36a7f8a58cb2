//! Named logical GPIO lines.
//!
//! The crate models discrete lines at the level the appliance cares about:
//! drive an output HIGH or LOW, read an input, and get told when an input
//! changes. Electrical details stay with the kernel.
//!
//! - `memory`: process-local lines backed by an atomic, used for simulation.
//! - `sysfs`: lines exported through the legacy `/sys/class/gpio` interface.
//! - `edge`: polling watcher turning input level changes into edge events.

use std::fmt;

use thiserror::Error;

mod edge;
mod memory;
mod sysfs;

pub use edge::{EdgeEvent, spawn_edge_watcher};
pub use memory::MemoryLine;
pub use sysfs::{DEFAULT_SYSFS_ROOT, Direction, SysfsLine};

/// Logical level of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    pub fn from_high(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("LOW"),
            Level::High => f.write_str("HIGH"),
        }
    }
}

/// Board-level label of a line (the pin number printed on the header).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LineId(pub u32);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum LineError {
    #[error("I/O error on {line}: {source}")]
    Io {
        line: LineId,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected value {value:?} read from {line}")]
    InvalidLevel { line: LineId, value: String },
}

/// A line this process drives.
pub trait OutputLine: Send {
    fn id(&self) -> LineId;
    fn set_level(&mut self, level: Level) -> Result<(), LineError>;
}

/// A line this process samples. Shared between the watcher and whoever handles
/// its edges, hence `Sync`.
pub trait InputLine: Send + Sync {
    fn id(&self) -> LineId;
    fn level(&self) -> Result<Level, LineError>;
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn id(&self) -> LineId {
        (**self).id()
    }

    fn set_level(&mut self, level: Level) -> Result<(), LineError> {
        (**self).set_level(level)
    }
}
