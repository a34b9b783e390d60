//! Command line and log setup.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use vkframe::ash::vk;
use vkframe::device::QueueMode;
use vkframe::instance::VulkanLogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, clap::ValueEnum)]
pub enum LogLevel {
    Off,
    Trace,
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ValidationLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<ValidationLevel> for VulkanLogLevel {
    fn from(level: ValidationLevel) -> Self {
        match level {
            ValidationLevel::Verbose => Self::Verbose,
            ValidationLevel::Info => Self::Info,
            ValidationLevel::Warning => Self::Warning,
            ValidationLevel::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Queues {
    /// A present-only family when graphics cannot present.
    #[default]
    Auto,
    /// One family for both.
    Unified,
}

impl From<Queues> for QueueMode {
    fn from(queues: Queues) -> Self {
        match queues {
            Queues::Auto => Self::Auto,
            Queues::Unified => Self::Unified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Polygons {
    #[default]
    Fill,
    Line,
}

impl From<Polygons> for vk::PolygonMode {
    fn from(polygons: Polygons) -> Self {
        match polygons {
            Polygons::Fill => Self::FILL,
            Polygons::Line => Self::LINE,
        }
    }
}

/// Present a spinning quad, or just a cleared window without shaders.
#[derive(Debug, clap::Parser)]
#[command(version)]
pub struct Args {
    #[arg(short, long, value_enum, default_value_t)]
    pub tracing_log_level: LogLevel,

    /// Forward Vulkan validation messages at or above this level.
    #[arg(short, long, value_enum)]
    pub graphics_debug_level: Option<ValidationLevel>,

    /// Fail instead of running without the Khronos validation layer.
    #[arg(long)]
    pub require_validation: bool,

    #[arg(long, value_enum, default_value_t)]
    pub queue_mode: Queues,

    #[arg(long, default_value_t = 2)]
    pub frames_in_flight: usize,

    #[arg(long, value_enum, default_value_t)]
    pub polygon_mode: Polygons,

    /// Only accept devices that can switch polygon mode per frame. P
    /// toggles it while running.
    #[arg(long)]
    pub dynamic_polygon_mode: bool,

    /// SPIR-V vertex shader.
    #[arg(long, requires = "fragment_shader")]
    pub vertex_shader: Option<PathBuf>,

    /// SPIR-V fragment shader.
    #[arg(long, requires = "vertex_shader")]
    pub fragment_shader: Option<PathBuf>,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,
}

/// Where the log file goes: the runtime directory if the platform has
/// one, the data directory otherwise, the working directory as a last
/// resort.
fn log_dir() -> eyre::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "vkframe", "vkframe-demo");
    match dirs {
        Some(dirs) => Ok(dirs.runtime_dir().unwrap_or(dirs.data_dir()).to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}

fn log_file_in(dir: &Path) -> PathBuf {
    dir.join("vkframe-demo.log")
}

/// Pretty stdout output filtered at `level`, plus an unfiltered plain
/// copy in the log file. `Off` installs nothing.
pub fn init_logging(level: LogLevel) -> eyre::Result<Option<PathBuf>> {
    if level == LogLevel::Off {
        return Ok(None);
    }
    let dir = log_dir()?;
    fs::create_dir_all(&dir)?;
    let path = log_file_in(&dir);
    let file = File::create(&path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_filter(level.filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false),
        )
        .try_init()?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("vkframe-demo").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.tracing_log_level, LogLevel::Error);
        assert_eq!(args.queue_mode, Queues::Auto);
        assert_eq!(args.frames_in_flight, 2);
        assert_eq!(args.polygon_mode, Polygons::Fill);
        assert_eq!((args.width, args.height), (1280, 720));
        assert!(args.graphics_debug_level.is_none());
        assert!(!args.require_validation);
        assert!(args.vertex_shader.is_none());
    }

    #[test]
    fn shaders_come_in_pairs() {
        assert!(parse(&["--vertex-shader", "quad.vert.spv"]).is_err());
        assert!(parse(&["--fragment-shader", "quad.frag.spv"]).is_err());
        let args = parse(&[
            "--vertex-shader",
            "quad.vert.spv",
            "--fragment-shader",
            "quad.frag.spv",
        ])
        .unwrap();
        assert_eq!(args.fragment_shader, Some(PathBuf::from("quad.frag.spv")));
    }

    #[test]
    fn value_enums_parse_kebab_case() {
        let args = parse(&["-t", "debug", "-g", "warning", "--queue-mode", "unified"]).unwrap();
        assert_eq!(args.tracing_log_level, LogLevel::Debug);
        assert_eq!(args.graphics_debug_level, Some(ValidationLevel::Warning));
        assert_eq!(QueueMode::from(args.queue_mode), QueueMode::Unified);
    }

    #[test]
    fn choices_map_to_library_types() {
        assert_eq!(vk::PolygonMode::from(Polygons::Line), vk::PolygonMode::LINE);
        assert_eq!(
            VulkanLogLevel::from(ValidationLevel::Verbose),
            VulkanLogLevel::Verbose
        );
        assert_eq!(LogLevel::Off.filter(), LevelFilter::OFF);
        assert_eq!(LogLevel::Trace.filter(), LevelFilter::TRACE);
    }

    #[test]
    fn log_file_name() {
        assert_eq!(
            log_file_in(Path::new("/tmp/demo")),
            PathBuf::from("/tmp/demo/vkframe-demo.log")
        );
    }
}
