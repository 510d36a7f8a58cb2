//! Configuration parsing for the station.
//!
//! CLI flags pick the feed, the reporting endpoint and the line backend; the
//! optional TOML profile carries everything tied to the deployment (class
//! taxonomy, alert thresholds, board line numbers).

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use frame_ingest::FeedSource;
use gpio_lines::DEFAULT_SYSFS_ROOT;
use paddock_core::{AlertRules, DEFAULT_WINDOW, Taxonomy};
use serde::Deserialize;

/// Where the output and enable lines live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LineBackend {
    /// Process-local lines; the enable input is driven with `POST /gate/{high,low}`.
    Memory,
    /// Kernel GPIO lines under the sysfs root.
    Sysfs,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the station.
pub struct StationConfig {
    /// JSON-lines detection feed.
    pub feed: FeedSource,
    /// Deployment profile, defaults when no file was given.
    pub profile: Profile,
    /// Address the reporting endpoint binds to.
    pub bind: String,
    pub port: u16,
    /// Directory served for paths other than the metrics routes.
    pub static_dir: PathBuf,
    /// Minimum spacing between frames, `None` to read as fast as possible.
    pub pace: Option<Duration>,
    /// Write each filtered frame to stdout as a JSON line.
    pub emit: bool,
    pub backend: LineBackend,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing station spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    pub verbose: bool,
}

/// Deployment profile loaded from TOML. Every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub classes: Taxonomy,
    pub alerts: AlertRules,
    pub rate: RateSettings,
    pub lines: LineSettings,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateSettings {
    /// Arrival timestamps kept per source.
    pub window: usize,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

/// Board labels of the three outputs and the enable input.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineSettings {
    pub class_a: u32,
    pub class_b: u32,
    pub class_c: u32,
    pub enable: u32,
    /// Enable input poll period in milliseconds.
    pub poll_ms: u64,
    pub sysfs: SysfsSettings,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            class_a: 29,
            class_b: 31,
            class_c: 33,
            enable: 32,
            poll_ms: 5,
            sysfs: SysfsSettings::default(),
        }
    }
}

impl LineSettings {
    pub fn outputs(&self) -> [u32; 3] {
        [self.class_a, self.class_b, self.class_c]
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Kernel line numbers, when they differ from the board labels.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SysfsSettings {
    pub root: PathBuf,
    pub class_a: Option<u32>,
    pub class_b: Option<u32>,
    pub class_c: Option<u32>,
    pub enable: Option<u32>,
}

impl Default for SysfsSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            class_a: None,
            class_b: None,
            class_c: None,
            enable: None,
        }
    }
}

impl SysfsSettings {
    /// Kernel numbers for outputs A, B, C and the enable input.
    pub fn numbers(&self, labels: &LineSettings) -> ([u32; 3], u32) {
        (
            [
                self.class_a.unwrap_or(labels.class_a),
                self.class_b.unwrap_or(labels.class_b),
                self.class_c.unwrap_or(labels.class_c),
            ],
            self.enable.unwrap_or(labels.enable),
        )
    }
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse profile {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        self.classes.validate()?;
        if self.alerts.capacity == 0 {
            bail!("[alerts] capacity must be at least 1");
        }
        if !self.alerts.low_fps.is_finite() {
            bail!("[alerts] low_fps must be a finite number");
        }
        if self.rate.window == 0 {
            bail!("[rate] window must be at least 1");
        }
        if self.lines.poll_ms == 0 {
            bail!("[lines] poll_ms must be at least 1");
        }
        let lines = &self.lines;
        let labels: HashSet<u32> = [lines.class_a, lines.class_b, lines.class_c, lines.enable]
            .into_iter()
            .collect();
        if labels.len() != 4 {
            bail!("[lines] class_a, class_b, class_c and enable must be distinct lines");
        }
        Ok(())
    }
}

/// CLI arguments accepted by the station.
#[derive(Debug, Args)]
pub struct StationCliArgs {
    /// JSON-lines detection feed, `-` for stdin.
    #[arg(long = "feed", value_name = "PATH", default_value = "-")]
    pub feed: String,
    /// TOML deployment profile.
    #[arg(long = "profile", value_name = "PATH")]
    pub profile: Option<PathBuf>,
    /// Port of the metrics endpoint.
    #[arg(long = "port", value_name = "PORT", default_value_t = 8000)]
    pub port: u16,
    /// Address the metrics endpoint binds to.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: String,
    /// Directory served for any other path.
    #[arg(long = "static-dir", value_name = "DIR", default_value = ".")]
    pub static_dir: PathBuf,
    /// Release feed frames at most this many times per second (0 = unpaced).
    #[arg(long = "pace-fps", value_name = "FPS")]
    pub pace_fps: Option<f64>,
    /// Write filtered frames to stdout as JSON lines.
    #[arg(long = "emit", action = clap::ArgAction::SetTrue)]
    pub emit: bool,
    /// Line backend driving the outputs and sampling the enable input. With
    /// `memory`, the enable input starts HIGH and follows `POST /gate/{high,low}`.
    #[arg(long = "lines", value_enum, default_value_t = LineBackend::Memory)]
    pub lines: LineBackend,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Enable debug logging (per-frame status lines, edges).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl TryFrom<StationCliArgs> for StationConfig {
    type Error = anyhow::Error;

    fn try_from(args: StationCliArgs) -> Result<Self> {
        let profile = match args.profile.as_deref() {
            Some(path) => Profile::load(path)?,
            None => Profile::default(),
        };
        profile.validate()?;

        if args.port == 0 {
            bail!("--port must be between 1 and 65535");
        }
        if args.bind.trim().is_empty() {
            bail!("--bind must not be empty");
        }

        let pace = match args.pace_fps {
            Some(fps) if !fps.is_finite() || fps < 0.0 => {
                bail!("--pace-fps must be a non-negative number")
            }
            Some(fps) if fps > 0.0 => Some(Duration::from_secs_f64(1.0 / fps)),
            _ => None,
        };

        let telemetry = TelemetryOptions {
            chrome_trace_path: args.chrome_trace,
            verbose: args.verbose,
        };

        Ok(Self {
            feed: FeedSource::from_arg(&args.feed),
            profile,
            bind: args.bind,
            port: args.port,
            static_dir: args.static_dir,
            pace,
            emit: args.emit,
            backend: args.lines,
            telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn config_from(argv: &[&str]) -> Result<StationConfig> {
        let cli = Cli::try_parse_from(std::iter::once("paddock").chain(argv.iter().copied()))?;
        StationConfig::try_from(cli.station)
    }

    fn profile_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_appliance() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.feed, FeedSource::Stdin);
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.backend, LineBackend::Memory);
        assert_eq!(config.pace, None);
        assert_eq!(config.profile, Profile::default());
        assert_eq!(config.profile.lines.outputs(), [29, 31, 33]);
        assert_eq!(config.profile.lines.enable, 32);
        assert_eq!(config.profile.rate.window, 60);
        assert_eq!(config.profile.alerts.capacity, 20);
    }

    #[test]
    fn profile_overrides_sections() {
        let file = profile_file(
            r#"
[classes]
interest = ["goat"]
counters = { cows = ["cow"], dogs = ["dog"], sheep = ["sheep", "lamb"] }

[classes.actuation]
a = "goat"
b = "sheep"
c = "horse"

[alerts]
high_density = 4

[lines]
class_a = 11
poll_ms = 20

[lines.sysfs]
root = "/tmp/gpio"
class_a = 17
"#,
        );
        let path = file.path().to_str().unwrap();
        let config = config_from(&["--profile", path, "--lines", "sysfs"]).unwrap();
        let profile = &config.profile;

        assert!(profile.classes.interest.contains("goat"));
        assert_eq!(profile.classes.counters.dogs, vec!["dog".to_string()]);
        assert_eq!(profile.classes.actuation.a, "goat");
        assert_eq!(profile.alerts.high_density, 4);
        assert_eq!(profile.alerts.low_fps, 5.0);
        assert_eq!(profile.lines.poll(), Duration::from_millis(20));
        assert_eq!(
            profile.lines.sysfs.numbers(&profile.lines),
            ([17, 31, 33], 32)
        );
        assert_eq!(profile.lines.sysfs.root, PathBuf::from("/tmp/gpio"));
        assert_eq!(config.backend, LineBackend::Sysfs);
    }

    #[test]
    fn rejects_invalid_profiles() {
        for body in [
            "[alerts]\ncapacity = 0\n",
            "[rate]\nwindow = 0\n",
            "[lines]\nclass_a = 32\n",
            "[classes.actuation]\na = \"cow\"\nb = \"cow\"\nc = \"horse\"\n",
            "[unknown]\nkey = 1\n",
        ] {
            let file = profile_file(body);
            let path = file.path().to_str().unwrap();
            assert!(config_from(&["--profile", path]).is_err(), "accepted {body:?}");
        }
    }

    #[test]
    fn pacing_and_port_are_validated() {
        let config = config_from(&["--pace-fps", "25", "--feed", "frames.jsonl"]).unwrap();
        assert_eq!(config.pace, Some(Duration::from_millis(40)));
        assert_eq!(config.feed, FeedSource::File(PathBuf::from("frames.jsonl")));

        assert_eq!(config_from(&["--pace-fps", "0"]).unwrap().pace, None);
        assert!(config_from(&["--pace-fps", "-1"]).is_err());
        assert!(config_from(&["--port", "0"]).is_err());
        assert!(config_from(&["--profile", "/nonexistent/paddock.toml"]).is_err());
    }
}
