use std::{io, path::PathBuf};

use paddock_core::{BBox, Detection, FrameBatch};
use serde::Deserialize;
use thiserror::Error;

/// Where frames are read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedSource {
    Stdin,
    File(PathBuf),
}

impl FeedSource {
    /// `-` selects stdin, anything else is a path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            FeedSource::Stdin
        } else {
            FeedSource::File(PathBuf::from(arg))
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open detection feed {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed frame on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IngestError {
    /// Malformed lines only cost one frame; anything else ends the feed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::Malformed { .. })
    }
}

/// One line of the JSON-lines feed.
#[derive(Debug, Deserialize)]
pub(crate) struct WireFrame {
    #[serde(default)]
    source_id: u32,
    frame_num: u64,
    #[serde(default)]
    objects: Vec<WireObject>,
}

#[derive(Debug, Deserialize)]
struct WireObject {
    #[serde(default)]
    label: String,
    /// `[x, y, width, height]`
    bbox: [f32; 4],
}

impl WireFrame {
    /// Parse one raw line. Bad encoding is reported like any other malformed line.
    pub(crate) fn parse(raw: &[u8], line: usize) -> Result<Self, IngestError> {
        serde_json::from_slice(raw).map_err(|source| IngestError::Malformed { line, source })
    }

    /// Build the batch, dropping detections when inference did not run.
    pub(crate) fn into_batch(self, inferred: bool) -> FrameBatch {
        let frame_num = self.frame_num;
        let detections = if inferred {
            self.objects
                .into_iter()
                .map(|object| {
                    let [x, y, width, height] = object.bbox;
                    Detection::new(object.label, BBox::new(x, y, width, height), frame_num)
                })
                .collect()
        } else {
            Vec::new()
        };
        FrameBatch::new(self.source_id, frame_num, detections)
    }
}
