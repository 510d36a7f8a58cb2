use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::{InputLine, Level, LineId};

/// Notification that an input changed level. Handlers read the current level
/// themselves; by the time they run it may have changed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub line: LineId,
}

/// Poll `line` every `poll` and emit an [`EdgeEvent`] on both rising and
/// falling transitions.
///
/// The thread exits when `running` is cleared or the receiver is dropped. Read
/// errors are logged once per failing streak and the previous level is kept.
pub fn spawn_edge_watcher(
    line: Arc<dyn InputLine>,
    poll: Duration,
    events: Sender<EdgeEvent>,
    running: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    let id = line.id();
    thread::Builder::new()
        .name(format!("edge-watch-{}", id.0))
        .spawn(move || {
            let mut failing = false;
            let mut last: Option<Level> = read(line.as_ref(), &mut failing);

            while running.load(Ordering::Relaxed) {
                thread::sleep(poll);
                let Some(level) = read(line.as_ref(), &mut failing) else {
                    continue;
                };
                if last.is_some_and(|prev| prev != level) {
                    debug!("{id} edge -> {level}");
                    if events.send(EdgeEvent { line: id }).is_err() {
                        debug!("edge receiver for {id} dropped; stopping watcher");
                        break;
                    }
                }
                last = Some(level);
            }
        })
}

fn read(line: &dyn InputLine, failing: &mut bool) -> Option<Level> {
    match line.level() {
        Ok(level) => {
            *failing = false;
            Some(level)
        }
        Err(err) => {
            if !*failing {
                warn!("failed to sample {}: {err}", line.id());
            }
            *failing = true;
            None
        }
    }
}
