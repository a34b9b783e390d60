#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod app;
mod cli;
mod scene;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use vkframe::device::DeviceConfig;
use vkframe::instance::{Instance, InstanceConfig};
use vkframe::presenter::PresenterConfig;
use vkframe::swapchain_manager::ExtentPoll;
use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoop;

use crate::app::{DemoApp, Launch};
use crate::cli::Args;
use crate::scene::SceneAssets;

/// A single poll per attempt. A minimized window leaves recreation pending
/// without stalling the event loop.
const EXTENT_POLL: ExtentPoll = ExtentPoll {
    interval: Duration::from_millis(4),
    max_polls: Some(1),
};

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.05, 1.0];

fn presenter_config(args: &Args) -> PresenterConfig {
    PresenterConfig {
        frames_in_flight: args.frames_in_flight,
        clear_color: CLEAR_COLOR,
        preferred_format: None,
        extent_poll: EXTENT_POLL,
        polygon_mode: args.polygon_mode.into(),
    }
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();
    if let Some(path) = cli::init_logging(args.tracing_log_level)? {
        println!("Logging to {}", path.display());
    }
    tracing::debug!(?args, "Starting");

    let assets = SceneAssets::load(args.vertex_shader.as_deref(), args.fragment_shader.as_deref())?;
    let event_loop = EventLoop::new()?;

    // SAFETY: loads the system Vulkan loader, which is trusted.
    let instance = unsafe {
        Instance::new(
            "vkframe-demo",
            args.graphics_debug_level.map(Into::into),
            Some(&event_loop),
            InstanceConfig {
                surface: true,
                require_validation: args.require_validation,
            },
        )
    }
    .map_err(|e| {
        let context = if e.is_precondition() {
            "Vulkan on this system does not support the requested configuration"
        } else {
            "Failed to create Vulkan instance"
        };
        eyre::Report::new(e).wrap_err(context)
    })?;

    let mut app = DemoApp::new(Launch {
        instance: Arc::new(instance),
        device_config: DeviceConfig {
            swapchain: true,
            queue_mode: args.queue_mode.into(),
            dynamic_polygon_mode: args.dynamic_polygon_mode,
        },
        presenter_config: presenter_config(&args),
        assets,
        window_size: PhysicalSize::new(args.width, args.height),
    });
    event_loop.run_app(&mut app).wrap_err("Event loop failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presenter_config_follows_args() {
        let args = Args::try_parse_from(["vkframe-demo", "--frames-in-flight", "3", "--polygon-mode", "line"])
            .unwrap();
        let config = presenter_config(&args);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.polygon_mode, vkframe::ash::vk::PolygonMode::LINE);
        assert_eq!(config.clear_color, CLEAR_COLOR);
        assert!(config.preferred_format.is_none());
    }

    #[test]
    fn extent_poll_is_bounded() {
        assert_eq!(EXTENT_POLL.max_polls, Some(1));
    }
}
