//! Station supervisor tying together the lines, the inference gate, the
//! detection feed and the reporting server.
//!
//! Lines, gate, probe and server are built once and live for the whole run;
//! only the feed is reopened when it fails, so metrics and line state carry
//! across restarts.

use std::{
    io::{self, Write},
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use frame_ingest::{FeedCursor, IngestError, spawn_feed_reader};
use gpio_lines::{EdgeEvent, InputLine, OutputLine, spawn_edge_watcher};
use paddock_core::{
    ActuationController, FrameBatch, FrameProbe, GateState, InferenceGate, MetricsAggregator,
    RateEstimator, SharedSnapshot, SkipInterval,
};
use tracing::{debug, error, info, warn};

use crate::station::{
    StationConfig, lines,
    server::{ServerState, spawn_report_server},
    telemetry,
};

/// Frames between status lines at debug level.
const STATUS_EVERY: u64 = 30;
const RECV_POLL: Duration = Duration::from_millis(200);

/// Run the station until the feed ends or Ctrl+C, reopening the feed on faults.
pub fn run(config: StationConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::init(&config.telemetry)?;
    let prometheus = telemetry::init_metrics_recorder()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let station_span = tracing::info_span!(
        "paddock.station",
        feed = ?config.feed,
        backend = ?config.backend,
        port = config.port
    );
    let _station_guard = station_span.enter();

    let profile = &config.profile;
    let taxonomy = Arc::new(profile.classes.clone());
    let snapshot = SharedSnapshot::new(profile.alerts.capacity);

    let station_lines = lines::open(config.backend, &profile.lines)?;
    let actuator = ActuationController::new(station_lines.outputs, taxonomy.actuation.clone());
    let enable = station_lines.enable;
    let enable_driver = station_lines.enable_driver;

    let gate = Arc::new(InferenceGate::new());
    let watching = Arc::new(AtomicBool::new(true));
    let (edge_tx, edge_rx) = crossbeam_channel::unbounded();
    let gate_handle = spawn_gate_actor(gate.clone(), enable.clone(), edge_rx)
        .context("Failed to spawn inference gate thread")?;
    let watcher_handle =
        spawn_edge_watcher(enable.clone(), profile.lines.poll(), edge_tx, watching.clone())
            .context("Failed to spawn enable line watcher")?;

    let skip = Arc::new(SkipInterval::default());
    let cursor = FeedCursor::default();
    let mut feed = Some(
        spawn_feed_reader(config.feed.clone(), skip.clone(), config.pace, cursor.clone())
            .context("Failed to open detection feed")?,
    );
    gate.attach(skip.clone());
    debug!("Inference stage attached to gate on {}", enable.id());

    let report_server = spawn_report_server(
        ServerState {
            snapshot: snapshot.clone(),
            prometheus: Some(prometheus.clone()),
            static_dir: config.static_dir.clone(),
            enable: enable_driver,
        },
        &config.bind,
        config.port,
    )
    .context("Failed to start metrics server")?;

    let mut probe = FrameProbe::new(
        RateEstimator::new(profile.rate.window),
        taxonomy.clone(),
        actuator,
        MetricsAggregator::new(snapshot, taxonomy, profile.alerts.clone()),
        skip.clone(),
    );

    info!("Running station, press Ctrl+C to stop");

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let frames = match feed.take() {
            Some(frames) => frames,
            None => match spawn_feed_reader(
                config.feed.clone(),
                skip.clone(),
                config.pace,
                cursor.clone(),
            ) {
                Ok(frames) => frames,
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    error!("Detection feed error: {err}, attempt #{attempt}");
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            },
        };

        match stream_frames(&mut probe, &frames, &shutdown, config.emit) {
            StreamOutcome::Graceful => break,
            StreamOutcome::Restart(reason) => {
                attempt = attempt.saturating_add(1);
                warn!(
                    "Reopening detection feed after line {} (reason: {reason}), attempt #{attempt}",
                    cursor.lines()
                );
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    info!("Stopping station");
    report_server.stop();
    watching.store(false, Ordering::SeqCst);
    let _ = watcher_handle.join();
    let _ = gate_handle.join();

    Ok(())
}

/// Result of streaming one feed.
#[derive(Debug, PartialEq, Eq)]
enum StreamOutcome {
    Graceful,
    Restart(&'static str),
}

/// Handle enable edges off the streaming thread. Exits once the watcher drops
/// its sender.
fn spawn_gate_actor(
    gate: Arc<InferenceGate>,
    enable: Arc<dyn InputLine>,
    edges: Receiver<EdgeEvent>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("inference-gate", move || {
        for edge in edges.iter() {
            if edge.line != enable.id() {
                debug!("ignoring edge on unexpected {}", edge.line);
                continue;
            }
            let _edge_guard = tracing::info_span!("gate.edge", line = edge.line.0).entered();
            if let Some(state) = gate.handle_edge(enable.as_ref()) {
                let label = match state {
                    GateState::Enabled => "enabled",
                    GateState::Disabled => "disabled",
                };
                metrics::counter!("paddock_gate_transitions_total", "state" => label).increment(1);
            }
        }
    })
}

fn stream_frames<L: OutputLine>(
    probe: &mut FrameProbe<L>,
    frames: &Receiver<Result<FrameBatch, IngestError>>,
    shutdown: &AtomicBool,
    emit: bool,
) -> StreamOutcome {
    let mut processed: u64 = 0;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return StreamOutcome::Graceful;
        }

        match frames.recv_timeout(RECV_POLL) {
            Ok(Ok(mut batch)) => {
                processed = processed.wrapping_add(1);
                handle_frame(probe, &mut batch, processed, emit);
            }
            Ok(Err(err)) if !err.is_fatal() => {
                warn!("Skipping feed line: {err}");
                metrics::counter!("paddock_feed_errors_total", "kind" => "malformed").increment(1);
            }
            Ok(Err(err)) => {
                error!("Detection feed error: {err}");
                metrics::counter!("paddock_feed_errors_total", "kind" => "io").increment(1);
                return StreamOutcome::Restart("feed error");
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("Detection feed ended after {processed} frames");
                return StreamOutcome::Graceful;
            }
        }
    }
}

fn handle_frame<L: OutputLine>(
    probe: &mut FrameProbe<L>,
    batch: &mut FrameBatch,
    processed: u64,
    emit: bool,
) {
    let frame_span = tracing::info_span!(
        "frame",
        frame = batch.frame_num,
        source = batch.source_id,
        status = tracing::field::Empty
    );
    let _frame_guard = frame_span.enter();

    let started = Instant::now();
    let outcome = probe.process(batch, started);
    let latency = started.elapsed();

    frame_span.record("status", &tracing::field::display(&outcome.status));
    metrics::counter!("paddock_frames_total").increment(1);
    metrics::gauge!("paddock_fps", "source" => batch.source_id.to_string()).set(outcome.fps);
    metrics::histogram!("paddock_probe_latency_seconds").record(latency.as_secs_f64());
    if let Some(state) = outcome.state {
        metrics::counter!("paddock_actuation_total", "state" => state.label()).increment(1);
    }
    if !outcome.committed {
        metrics::counter!("paddock_snapshot_skipped_total").increment(1);
    }

    if processed % STATUS_EVERY == 0 {
        debug!("{}", outcome.status);
    }

    if emit {
        if let Err(err) = emit_frame(batch) {
            warn!("Failed to emit frame {}: {err}", batch.frame_num);
        }
    }
}

fn emit_frame(batch: &FrameBatch) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, batch)?;
    writeln!(stdout)
}

#[cfg(test)]
mod tests {
    use gpio_lines::{Level, LineId, MemoryLine};
    use paddock_core::{
        AlertRules, BBox, DISABLED_INTERVAL, Detection, InferenceControl, Taxonomy,
    };

    use super::*;

    fn probe(snapshot: SharedSnapshot) -> (FrameProbe<MemoryLine>, [MemoryLine; 3]) {
        let taxonomy = Arc::new(Taxonomy::default());
        let lines = [29, 31, 33].map(|pin| MemoryLine::new(LineId(pin), Level::High));
        let probe = FrameProbe::new(
            RateEstimator::default(),
            taxonomy.clone(),
            ActuationController::new(lines.clone(), taxonomy.actuation.clone()),
            MetricsAggregator::new(snapshot, taxonomy, AlertRules::default()),
            Arc::new(SkipInterval::default()),
        );
        (probe, lines)
    }

    fn malformed() -> IngestError {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        IngestError::Malformed { line: 3, source }
    }

    #[test]
    fn streams_until_feed_ends() {
        let snapshot = SharedSnapshot::new(20);
        let (mut probe, lines) = probe(snapshot.clone());
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Ok(FrameBatch::new(
            0,
            1,
            vec![Detection::new("sheep", BBox::new(0.0, 0.0, 8.0, 8.0), 1)],
        )))
        .unwrap();
        tx.send(Err(malformed())).unwrap();
        tx.send(Ok(FrameBatch::new(
            0,
            2,
            vec![
                Detection::new("horse", BBox::new(0.0, 0.0, 4.0, 4.0), 2),
                Detection::new("cow", BBox::new(0.0, 0.0, 1.0, 1.0), 2),
            ],
        )))
        .unwrap();
        drop(tx);

        let outcome = stream_frames(&mut probe, &rx, &AtomicBool::new(false), false);

        assert_eq!(outcome, StreamOutcome::Graceful);
        let snap = snapshot.read().unwrap();
        assert_eq!(snap.frame, 2);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.cows, 1);
        assert_eq!(snap.largest_animal, "horse");
        assert_eq!(lines.map(|line| line.get()), [Level::High, Level::High, Level::Low]);
    }

    #[test]
    fn fatal_feed_error_requests_restart() {
        let (mut probe, _) = probe(SharedSnapshot::new(20));
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Err(IngestError::Io(io::Error::other("device gone"))))
            .unwrap();

        let outcome = stream_frames(&mut probe, &rx, &AtomicBool::new(false), false);
        assert_eq!(outcome, StreamOutcome::Restart("feed error"));
    }

    #[test]
    fn shutdown_stops_streaming() {
        let (mut probe, _) = probe(SharedSnapshot::new(20));
        let (_tx, rx) = crossbeam_channel::unbounded();
        let outcome = stream_frames(&mut probe, &rx, &AtomicBool::new(true), false);
        assert_eq!(outcome, StreamOutcome::Graceful);
    }

    #[test]
    fn gate_actor_follows_enable_edges() {
        let gate = Arc::new(InferenceGate::new());
        let skip = Arc::new(SkipInterval::default());
        gate.attach(skip.clone());
        let enable = MemoryLine::new(LineId(32), Level::High);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_gate_actor(gate.clone(), Arc::new(enable.clone()), rx).unwrap();

        enable.drive(Level::Low);
        tx.send(EdgeEvent { line: LineId(32) }).unwrap();
        tx.send(EdgeEvent { line: LineId(7) }).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(gate.state(), GateState::Disabled);
        assert_eq!(skip.interval(), DISABLED_INTERVAL);
    }
}
