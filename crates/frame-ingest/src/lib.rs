//! Detection feed for the paddock decision layer.
//!
//! Frames arrive as JSON lines, one per rendered frame:
//! `{"source_id":0,"frame_num":42,"objects":[{"label":"cow","bbox":[x,y,w,h]}]}`.
//! The reader stands in for the inference stage as far as cadence goes: it
//! honours the shared skip interval and forwards frames without detections on
//! the frames inference would have skipped.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use paddock_core::{FrameBatch, InferenceControl};
use tracing::debug;

mod types;

pub use types::{FeedSource, IngestError};

use types::WireFrame;

/// Decides which frames get inference under a skip interval of `n`: one
/// frame runs, the next `n` are skipped.
#[derive(Debug, Default)]
pub struct InferenceCadence {
    skipped: u32,
}

impl InferenceCadence {
    pub fn admit(&mut self, interval: u32) -> bool {
        if self.skipped >= interval {
            self.skipped = 0;
            true
        } else {
            self.skipped += 1;
            false
        }
    }
}

/// Lines consumed so far from a feed, shared across reopenings.
///
/// A file feed reopened with the same cursor skips what was already read;
/// stdin keeps its own position and ignores it.
#[derive(Clone, Debug, Default)]
pub struct FeedCursor(Arc<AtomicUsize>);

impl FeedCursor {
    pub fn lines(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn advance(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Spawn a thread reading frames from `source` and forwarding them over the
/// returned [`Receiver`].
///
/// Malformed lines are forwarded as errors and reading continues; I/O errors
/// are forwarded and end the feed. The channel disconnects at end of input.
/// With `pace` set, frames are released no faster than one per period.
pub fn spawn_feed_reader(
    source: FeedSource,
    control: Arc<dyn InferenceControl>,
    pace: Option<Duration>,
    cursor: FeedCursor,
) -> Result<Receiver<Result<FrameBatch, IngestError>>, IngestError> {
    let (reader, skip): (Box<dyn BufRead + Send>, usize) = match &source {
        FeedSource::Stdin => (Box::new(BufReader::new(io::stdin())), 0),
        FeedSource::File(path) => {
            let file = File::open(path).map_err(|source| IngestError::Open {
                path: path.clone(),
                source,
            })?;
            (Box::new(BufReader::new(file)), cursor.lines())
        }
    };

    let (tx, rx) = bounded(2);
    thread::Builder::new()
        .name("frame-ingest".into())
        .spawn(move || {
            if skip > 0 {
                debug!("resuming {source:?} after line {skip}");
            }
            if let Err(err) = feed_loop(reader, skip, &cursor, control.as_ref(), pace, &tx) {
                let _ = tx.send(Err(err));
            }
            debug!("detection feed {source:?} finished");
        })?;

    Ok(rx)
}

fn feed_loop(
    mut reader: impl BufRead,
    skip: usize,
    cursor: &FeedCursor,
    control: &dyn InferenceControl,
    pace: Option<Duration>,
    tx: &Sender<Result<FrameBatch, IngestError>>,
) -> Result<(), IngestError> {
    let mut cadence = InferenceCadence::default();
    let mut next_due = Instant::now();
    let mut raw = Vec::new();
    let mut line_no = 0;

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(());
        }
        line_no += 1;
        if line_no <= skip {
            continue;
        }
        let line = cursor.advance();

        let text = raw.trim_ascii();
        if text.is_empty() {
            continue;
        }

        if let Some(period) = pace {
            let now = Instant::now();
            if next_due > now {
                thread::sleep(next_due - now);
            }
            next_due = next_due.max(now) + period;
        }

        let item = WireFrame::parse(text, line)
            .map(|frame| frame.into_batch(cadence.admit(control.interval())));
        if tx.send(item).is_err() {
            return Ok(());
        }
    }
}
