use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::entities::RenderSize;

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Images: image 0.25\n",
    "Movies: frame sequences (glob)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Video sequence renderer
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: seqrender.log in the config dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render the active scene of a project to PNG files
    Render(RenderArgs),
    /// Render timeline thumbnails of one strip
    Thumbs(ThumbArgs),
}

/// Proxy resolution on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyArg {
    Scene,
    #[value(name = "25")]
    P25,
    #[value(name = "50")]
    P50,
    #[value(name = "75")]
    P75,
    #[value(name = "100")]
    P100,
}

impl From<ProxyArg> for RenderSize {
    fn from(value: ProxyArg) -> Self {
        match value {
            ProxyArg::Scene => RenderSize::Scene,
            ProxyArg::P25 => RenderSize::P25,
            ProxyArg::P50 => RenderSize::P50,
            ProxyArg::P75 => RenderSize::P75,
            ProxyArg::P100 => RenderSize::P100,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Project JSON file
    #[arg(value_name = "PROJECT")]
    pub project: PathBuf,

    /// Output directory (one PNG per frame)
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = "render")]
    pub out_dir: PathBuf,

    /// First frame (default: scene start)
    #[arg(long = "start", value_name = "N")]
    pub range_start: Option<i32>,

    /// Last frame, inclusive (default: scene end)
    #[arg(long = "end", value_name = "N")]
    pub range_end: Option<i32>,

    /// Frame range (shorthand for --start and --end)
    #[arg(long = "range", value_names = ["START", "END"], num_args = 2)]
    pub range: Option<Vec<i32>>,

    /// Show only channels up to N (0 = all)
    #[arg(long = "channel", value_name = "N", default_value_t = 0)]
    pub chanshown: i32,

    /// Preview size; proxies are used when not `scene`
    #[arg(long = "proxy", value_enum, default_value = "scene")]
    pub proxy: ProxyArg,

    /// Render as final output (offline scene renders)
    #[arg(short = 'F', long = "final")]
    pub final_render: bool,

    /// Frames to prefetch ahead (overrides settings)
    #[arg(long = "prefetch", value_name = "N")]
    pub prefetch: Option<i32>,
}

impl RenderArgs {
    /// Inclusive range: `--range` wins over `--start`/`--end`, which win
    /// over the scene's own range.
    pub fn frame_range(&self, sfra: i32, efra: i32) -> (i32, i32) {
        if let Some(range) = &self.range
            && let [start, end] = range.as_slice()
        {
            return (*start, *end);
        }
        (self.range_start.unwrap_or(sfra), self.range_end.unwrap_or(efra))
    }
}

#[derive(clap::Args, Debug)]
pub struct ThumbArgs {
    /// Project JSON file
    #[arg(value_name = "PROJECT")]
    pub project: PathBuf,

    /// Strip name in the active scene
    #[arg(short = 's', long = "strip", value_name = "NAME")]
    pub strip: String,

    /// Output directory
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = "thumbs")]
    pub out_dir: PathBuf,

    /// Frames between thumbnails (default: the base set step)
    #[arg(long = "step", value_name = "N")]
    pub step: Option<f32>,
}
