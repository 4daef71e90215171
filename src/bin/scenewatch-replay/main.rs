use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use serde::Serialize;

use scenewatch::{
    engine_config::{EngineConfig, load_config_from_file},
    frame_runner::{FrameRunner, JsonLinesSource, RunnerControl, RunnerMessage},
    systems::{FrameAnalysis, anomaly::AnomalyEvent, statistics::StatsSnapshot},
};

mod cli;
use cli::{Cli, OutputFormat};

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "camelCase")]
enum OutputRecord<'a> {
    Frame(&'a FrameAnalysis),
    Anomaly(&'a AnomalyEvent),
    Snapshot(&'a StatsSnapshot),
    #[serde(rename_all = "camelCase")]
    Finished {
        snapshot: &'a StatsSnapshot,
        stopped_early: bool,
    },
}

struct RecordWriter {
    out: Box<dyn Write>,
    format: OutputFormat,
}

impl RecordWriter {
    fn write(&mut self, record: &OutputRecord) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, record)?;
                self.out.write_all(b"\n")?;
            }
            OutputFormat::Msgpack => {
                let payload = rmp_serde::to_vec_named(record)?;
                let length = u32::try_from(payload.len()).context("Record too large")?;
                self.out.write_all(&length.to_be_bytes())?;
                self.out.write_all(&payload)?;
            }
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = load_config_from_file(&cli.config_path)?;

    if let Some(path) = &cli.packed_config_path {
        let payload =
            fs::read(path).with_context(|| format!("Failed to read packed config {}", path))?;
        config.parse_packed_config(&payload)?;
        info!("Replaced config with packed config from \"{}\"", path);
    }

    if let Some(every) = cli.snapshot_every_frames {
        config.snapshot_every_frames = every;
        config.validate()?;
    }
    Ok(config)
}

fn run(cli: &Cli, config: &EngineConfig) -> Result<()> {
    let Some(input_path) = &cli.input_path else {
        anyhow::bail!("No --input given; nothing to replay");
    };
    let input =
        File::open(input_path).with_context(|| format!("Failed to open input {}", input_path))?;
    let out: Box<dyn Write> = match &cli.output_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output {}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let mut writer = RecordWriter {
        out,
        format: cli.format,
    };

    let runner = FrameRunner::new(config, JsonLinesSource::new(BufReader::new(input)))?;
    let handle = runner.spawn(RunnerControl::new(), cli.queue_size)?;

    for message in handle.receiver.iter() {
        match &message {
            RunnerMessage::Frame(analysis) => {
                if cli.include_frames {
                    writer.write(&OutputRecord::Frame(analysis))?;
                } else {
                    for event in &analysis.anomalies {
                        writer.write(&OutputRecord::Anomaly(event))?;
                    }
                }
            }
            RunnerMessage::Snapshot(snapshot) => {
                debug!("Snapshot at frame {}", snapshot.last_frame);
                writer.write(&OutputRecord::Snapshot(snapshot))?;
            }
            RunnerMessage::Finished {
                snapshot,
                stopped_early,
            } => {
                if *stopped_early {
                    warn!("Replay stopped before the end of the input");
                }
                writer.write(&OutputRecord::Finished {
                    snapshot,
                    stopped_early: *stopped_early,
                })?;
            }
        }
    }
    writer.out.flush()?;

    let summary = handle.join()?;
    info!(
        "Replayed {} frames; {} people, {} faces, {} objects, {} anomalies",
        summary.frames_processed,
        summary.unique_people,
        summary.unique_faces,
        summary.unique_objects,
        summary.detector.total_anomalies
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize the logger from the environment

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    let config = load_config(&cli).expect("failed to load engine config");

    if cli.write_config {
        config
            .write_config_to_file(&cli.config_path)
            .expect("failed to write config");
        return;
    }

    if let Err(e) = run(&cli, &config) {
        panic!("Replay failed: {:#}", e);
    }
}
