//! Lines exported through the legacy sysfs GPIO interface.
//!
//! Layout under the root (normally `/sys/class/gpio`):
//! `export` accepts a line number, after which `gpio<N>/direction` and
//! `gpio<N>/value` appear. Direction accepts `in`, `high` or `low`; the latter
//! two configure an output and set its initial level in one write.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{InputLine, Level, LineError, LineId, OutputLine};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    /// Output starting at the given level.
    Output(Level),
}

impl Direction {
    fn as_sysfs(self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output(Level::High) => "high",
            Direction::Output(Level::Low) => "low",
        }
    }
}

#[derive(Debug)]
pub struct SysfsLine {
    id: LineId,
    value_path: PathBuf,
}

impl SysfsLine {
    /// Export `number` under `root` if needed and configure its direction.
    pub fn open(
        root: &Path,
        id: LineId,
        number: u32,
        direction: Direction,
    ) -> Result<Self, LineError> {
        let io_err = |source: io::Error| LineError::Io { line: id, source };
        let line_dir = root.join(format!("gpio{number}"));

        if !line_dir.is_dir() {
            debug!("exporting gpio{number} for {id}");
            fs::write(root.join("export"), number.to_string()).map_err(io_err)?;
            if !line_dir.is_dir() {
                return Err(io_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not appear after export", line_dir.display()),
                )));
            }
        }

        fs::write(line_dir.join("direction"), direction.as_sysfs()).map_err(io_err)?;

        Ok(Self {
            id,
            value_path: line_dir.join("value"),
        })
    }
}

impl OutputLine for SysfsLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn set_level(&mut self, level: Level) -> Result<(), LineError> {
        let text = if level.is_high() { "1" } else { "0" };
        fs::write(&self.value_path, text).map_err(|source| LineError::Io {
            line: self.id,
            source,
        })
    }
}

impl InputLine for SysfsLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn level(&self) -> Result<Level, LineError> {
        let raw = fs::read_to_string(&self.value_path).map_err(|source| LineError::Io {
            line: self.id,
            source,
        })?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(LineError::InvalidLevel {
                line: self.id,
                value: other.to_string(),
            }),
        }
    }
}
