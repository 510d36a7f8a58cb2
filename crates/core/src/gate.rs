//! Inference gate.
//!
//! An enable input toggles whether the upstream inference stage runs on every
//! frame or not at all. The gate is written from the interrupt side and read
//! from the streaming thread, so both its state and the skip interval it
//! controls are single-word atomics.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, AtomicU32, Ordering},
};

use gpio_lines::{InputLine, Level};
use tracing::{info, warn};

/// Largest skip interval the inference stage accepts; effectively "never run".
pub const DISABLED_INTERVAL: u32 = i32::MAX as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    Enabled = 0,
    Disabled = 1,
}

impl GateState {
    fn from_u8(raw: u8) -> Self {
        if raw == GateState::Disabled as u8 {
            GateState::Disabled
        } else {
            GateState::Enabled
        }
    }

    pub fn interval(self) -> u32 {
        match self {
            GateState::Enabled => 0,
            GateState::Disabled => DISABLED_INTERVAL,
        }
    }
}

/// Skip-interval control exposed by an inference stage. `0` runs inference on
/// every frame; `n` skips `n` frames between inferred ones.
pub trait InferenceControl: Send + Sync {
    fn set_interval(&self, interval: u32);
    fn interval(&self) -> u32;

    fn is_running(&self) -> bool {
        self.interval() == 0
    }
}

/// Atomic skip interval shared between the gate and an inference stage.
#[derive(Debug, Default)]
pub struct SkipInterval(AtomicU32);

impl SkipInterval {
    pub fn new(interval: u32) -> Self {
        Self(AtomicU32::new(interval))
    }
}

impl InferenceControl for SkipInterval {
    fn set_interval(&self, interval: u32) {
        self.0.store(interval, Ordering::Release);
    }

    fn interval(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// Edge-driven ENABLED/DISABLED state machine.
///
/// Starts ENABLED. Until an inference stage is attached, edges are logged and
/// dropped.
#[derive(Default)]
pub struct InferenceGate {
    state: AtomicU8,
    control: OnceLock<Arc<dyn InferenceControl>>,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the inference stage. Only the first call takes effect.
    pub fn attach(&self, control: Arc<dyn InferenceControl>) -> bool {
        self.control.set(control).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.control.get().is_some()
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Handle an edge on `input` by sampling its current level.
    pub fn handle_edge(&self, input: &dyn InputLine) -> Option<GateState> {
        match input.level() {
            Ok(level) => {
                info!("enable edge on {}: level={level}", input.id());
                self.on_level(level)
            }
            Err(err) => {
                warn!("enable edge on {} but level unreadable: {err}", input.id());
                None
            }
        }
    }

    /// HIGH enables inference on every frame, LOW pauses it.
    pub fn on_level(&self, level: Level) -> Option<GateState> {
        let Some(control) = self.control.get() else {
            warn!("inference stage not initialised; ignoring {level} enable level");
            return None;
        };

        let next = if level.is_high() {
            GateState::Enabled
        } else {
            GateState::Disabled
        };
        control.set_interval(next.interval());
        self.state.store(next as u8, Ordering::Release);
        match next {
            GateState::Enabled => info!("inference started"),
            GateState::Disabled => info!("inference paused"),
        }
        Some(next)
    }
}
