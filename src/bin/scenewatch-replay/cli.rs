use clap::{Parser, ValueEnum};

// Some defaults; some of which can be overriden via CLI args
const CONFIG_FILE_PATH: &str = "./scenewatch.json";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON record per line
    Json,
    /// Length-prefixed (u32, big-endian) MessagePack records
    Msgpack,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Where to load engine config (JSON); defaults are used if missing
    #[arg(long="config",default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    /// Optional MessagePack-encoded config that replaces the JSON one
    #[arg(long = "packedConfig")]
    pub packed_config_path: Option<String>,

    /// Write the effective config back to --config and exit
    #[arg(long = "writeConfig")]
    pub write_config: bool,

    /// Recorded perception output: one JSON frame per line
    #[arg(long = "input")]
    pub input_path: Option<String>,

    /// Where to write results; stdout if omitted
    #[arg(long = "output")]
    pub output_path: Option<String>,

    #[arg(long = "format", value_enum, default_value_t=OutputFormat::Json)]
    pub format: OutputFormat,

    /// Also write every frame analysis, not only anomalies and snapshots
    #[arg(long = "includeFrames")]
    pub include_frames: bool,

    /// Override the snapshot cadence (frames) from the config file
    #[arg(long = "snapshotEveryFrames")]
    pub snapshot_every_frames: Option<u64>,

    /// Bounded queue size between the worker and the writer
    #[arg(long = "queueSize", default_value_t = 64)]
    pub queue_size: usize,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,
}
