use clap::Parser;

use crate::station::StationCliArgs;

/// Pick the dominant animal in each frame, drive the matching output line and
/// report herd metrics over HTTP.
#[derive(Debug, Parser)]
#[command(name = "paddock", version)]
pub struct Cli {
    #[command(flatten)]
    pub station: StationCliArgs,
}
