//! Line backend selection.

use std::sync::Arc;

use anyhow::{Context, Result};
use gpio_lines::{Direction, InputLine, Level, LineId, MemoryLine, OutputLine, SysfsLine};
use tracing::debug;

use crate::station::config::{LineBackend, LineSettings};

/// The three actuation outputs, already driven HIGH, and the enable input.
pub(crate) struct StationLines {
    pub(crate) outputs: [Box<dyn OutputLine>; 3],
    pub(crate) enable: Arc<dyn InputLine>,
    /// Second handle on an in-memory enable line, for driving it from outside.
    pub(crate) enable_driver: Option<MemoryLine>,
}

pub(crate) fn open(backend: LineBackend, settings: &LineSettings) -> Result<StationLines> {
    let labels = settings.outputs().map(LineId);
    let enable_id = LineId(settings.enable);

    match backend {
        LineBackend::Memory => {
            debug!("using in-memory lines {labels:?}, enable {enable_id}");
            let enable = MemoryLine::new(enable_id, Level::High);
            Ok(StationLines {
                outputs: labels
                    .map(|id| Box::new(MemoryLine::new(id, Level::High)) as Box<dyn OutputLine>),
                enable: Arc::new(enable.clone()),
                enable_driver: Some(enable),
            })
        }
        LineBackend::Sysfs => {
            let root = settings.sysfs.root.as_path();
            let (numbers, enable_number) = settings.sysfs.numbers(settings);

            let mut outputs = Vec::with_capacity(3);
            for (id, number) in labels.into_iter().zip(numbers) {
                let line = SysfsLine::open(root, id, number, Direction::Output(Level::High))
                    .with_context(|| format!("Failed to open output {id} (gpio{number})"))?;
                outputs.push(Box::new(line) as Box<dyn OutputLine>);
            }
            let enable = SysfsLine::open(root, enable_id, enable_number, Direction::Input)
                .with_context(|| {
                    format!("Failed to open enable input {enable_id} (gpio{enable_number})")
                })?;

            let outputs: [Box<dyn OutputLine>; 3] = outputs
                .try_into()
                .map_err(|_| anyhow::anyhow!("expected exactly three output lines"))?;
            Ok(StationLines {
                outputs,
                enable: Arc::new(enable),
                enable_driver: None,
            })
        }
    }
}
