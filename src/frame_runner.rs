use std::{
    io::BufRead,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::{
    engine_config::EngineConfig,
    perception::FrameAnnotations,
    systems::{
        FrameAnalysis, Systems,
        statistics::{SnapshotCadence, StatsSnapshot},
    },
};

/// Anything that can hand over perception output one frame at a time
pub trait FrameSource: Send {
    /// `None` once the source is exhausted
    fn next_frame(&mut self) -> Option<Result<FrameAnnotations>>;
}

/// Recorded perception output, one JSON-encoded [`FrameAnnotations`] per line
pub struct JsonLinesSource<R: BufRead + Send> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource {
            reader,
            line_number: 0,
        }
    }
}

impl<R: BufRead + Send> FrameSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Option<Result<FrameAnnotations>> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => {
                    return Some(
                        serde_json::from_str::<FrameAnnotations>(&line)
                            .with_context(|| format!("Bad frame on line {}", self.line_number)),
                    );
                }
                Err(e) => {
                    return Some(
                        Err(e).with_context(|| format!("Failed to read line {}", self.line_number)),
                    );
                }
            }
        }
    }
}

/// Cooperative pause/stop flags shared between the worker and its owner
#[derive(Clone, Default)]
pub struct RunnerControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl RunnerControl {
    pub fn new() -> Self {
        RunnerControl::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Takes effect at the next frame boundary
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum RunnerMessage {
    Frame(FrameAnalysis),
    Snapshot(StatsSnapshot),
    /// Last message of a run that did not fail; carries the final statistics
    Finished {
        snapshot: StatsSnapshot,
        stopped_early: bool,
    },
}

/// Processes frames from a source, strictly in order, on one worker thread
pub struct FrameRunner<S: FrameSource> {
    systems: Systems,
    source: S,
    cadence: SnapshotCadence,
    pause_poll: Duration,
}

impl<S: FrameSource> FrameRunner<S> {
    pub fn new(config: &EngineConfig, source: S) -> Result<Self> {
        Ok(FrameRunner {
            systems: Systems::new(config)?,
            source,
            cadence: SnapshotCadence::new(
                config.snapshot_every_frames,
                Duration::from_millis(config.snapshot_interval_ms),
            ),
            pause_poll: Duration::from_millis(config.pause_poll_ms.max(1)),
        })
    }

    /// Run until the source is exhausted, the runner is stopped or the
    /// receiving side goes away. Blocks the calling thread.
    pub fn run(
        mut self,
        control: &RunnerControl,
        tx: &Sender<RunnerMessage>,
    ) -> Result<StatsSnapshot> {
        let mut last_frame: Option<u64> = None;
        let mut stopped_early = false;

        loop {
            while control.is_paused() && !control.is_stopped() {
                thread::sleep(self.pause_poll);
            }
            if control.is_stopped() {
                info!(
                    "Stop requested; finishing after {} frames",
                    self.systems.statistics.frames_processed()
                );
                stopped_early = true;
                break;
            }

            let frame = match self.source.next_frame() {
                None => break,
                Some(frame) => frame?,
            };
            if let Some(previous) = last_frame {
                if frame.frame_number <= previous {
                    warn!(
                        "Frame {} arrived after frame {}; processing anyway",
                        frame.frame_number, previous
                    );
                }
            }
            last_frame = Some(frame.frame_number);

            let analysis = self.systems.process_frame(&frame);
            if tx.send(RunnerMessage::Frame(analysis)).is_err() {
                warn!("Nobody is listening for frame results any more; stopping");
                stopped_early = true;
                break;
            }

            if self.cadence.tick() {
                debug!("Sending statistics snapshot");
                if tx.send(RunnerMessage::Snapshot(self.systems.snapshot())).is_err() {
                    stopped_early = true;
                    break;
                }
            }
        }

        let snapshot = self.systems.snapshot();
        info!(
            "Run finished: {} frames, {} anomalies",
            snapshot.frames_processed, snapshot.detector.total_anomalies
        );
        // The receiver may already be gone; the snapshot is returned either way
        let _ = tx.send(RunnerMessage::Finished {
            snapshot: snapshot.clone(),
            stopped_early,
        });
        Ok(snapshot)
    }
}

impl<S: FrameSource + 'static> FrameRunner<S> {
    /// Start the worker thread; results arrive on the returned receiver
    pub fn spawn(self, control: RunnerControl, capacity: usize) -> Result<RunnerHandle> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let worker_control = control.clone();
        let handle = thread::Builder::new()
            .name(String::from("frame-runner"))
            .spawn(move || self.run(&worker_control, &tx))
            .context("Failed to start frame runner thread")?;

        Ok(RunnerHandle {
            control,
            receiver: rx,
            handle,
        })
    }
}

pub struct RunnerHandle {
    pub control: RunnerControl,
    pub receiver: Receiver<RunnerMessage>,
    handle: JoinHandle<Result<StatsSnapshot>>,
}

impl RunnerHandle {
    pub fn join(self) -> Result<StatsSnapshot> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Frame runner thread panicked"))?
    }
}
