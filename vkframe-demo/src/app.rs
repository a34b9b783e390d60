//! The winit side: window, surface and presenter through suspend and
//! resume.
//!
//! The device outlives suspension. The surface and the presenter do not,
//! since the platform may revoke the window's surface while suspended.

use std::sync::Arc;
use std::time::Instant;

use eyre::WrapErr;
use vkframe::ash::vk;
use vkframe::device::{Device, DeviceConfig};
use vkframe::frame::FrameOutcome;
use vkframe::instance::Instance;
use vkframe::presenter::{CreatePresenterError, FrameRequest, Presenter, PresenterConfig};
use vkframe::surface::Surface;
use vkframe::swapchain_manager::RecreateError;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::Key;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::scene::{SceneAssets, SceneUniforms};

/// Everything needed before the first window exists.
#[derive(Debug)]
pub struct Launch {
    pub instance: Arc<Instance>,
    pub device_config: DeviceConfig,
    pub presenter_config: PresenterConfig,
    pub assets: SceneAssets,
    pub window_size: PhysicalSize<u32>,
}

/// What survives a suspension.
#[derive(Debug)]
struct Session {
    window: Arc<Window>,
    device: Arc<Device>,
    instance: Arc<Instance>,
    presenter_config: PresenterConfig,
    assets: SceneAssets,
    started: Instant,
}

/// A session with a surface to draw on. Fields drop in declaration order,
/// so the presenter waits for the device before the surface goes.
#[derive(Debug)]
struct Live {
    /// `None` until the window first has a nonzero size.
    presenter: Option<Presenter<Window>>,
    surface: Arc<Surface<Window>>,
    session: Session,
    resize_pending: bool,
}

#[derive(Debug)]
enum Phase {
    Launching(Launch),
    Live(Live),
    Suspended(Session),
    Exited,
}

#[derive(Debug)]
pub struct DemoApp {
    phase: Phase,
}

impl DemoApp {
    pub fn new(launch: Launch) -> Self {
        Self {
            phase: Phase::Launching(launch),
        }
    }

    /// Install `next`, or log why it failed and stop the event loop.
    fn enter(&mut self, event_loop: &ActiveEventLoop, next: eyre::Result<Phase>) {
        let next = next.unwrap_or_else(|e| {
            tracing::error!("{e:?}");
            Phase::Exited
        });
        tracing::debug!("Entering {}", next.name());
        if matches!(next, Phase::Exited) {
            event_loop.exit();
        }
        self.phase = next;
    }

    fn live_for(&mut self, window_id: WindowId) -> Option<&mut Live> {
        match &mut self.phase {
            Phase::Live(live) if live.session.window.id() == window_id => Some(live),
            _ => None,
        }
    }
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Launching(_) => "launching",
            Self::Live(_) => "live",
            Self::Suspended(_) => "suspended",
            Self::Exited => "exited",
        }
    }
}

fn launch(event_loop: &ActiveEventLoop, launch: Launch) -> eyre::Result<Live> {
    let window = event_loop
        .create_window(
            WindowAttributes::default()
                .with_title("vkframe")
                .with_inner_size(launch.window_size),
        )
        .wrap_err("Failed to create window")?;
    let window = Arc::new(window);
    let surface = attach_surface(&launch.instance, &window)?;

    let device = Device::create_compatible(&launch.instance, &surface, launch.device_config)
        .map_err(|e| {
            let context = if e.is_precondition() {
                "No device meets the requested configuration"
            } else {
                "Failed to create device"
            };
            eyre::Report::new(e).wrap_err(context)
        })?;

    Live::new(
        surface,
        Session {
            window,
            device: Arc::new(device),
            instance: launch.instance,
            presenter_config: launch.presenter_config,
            assets: launch.assets,
            started: Instant::now(),
        },
    )
}

fn attach_surface(
    instance: &Arc<Instance>,
    window: &Arc<Window>,
) -> eyre::Result<Arc<Surface<Window>>> {
    // SAFETY: Live owns the surface and is torn down in `suspended`,
    // before the platform revokes the window's surface.
    let surface = unsafe { Surface::new(instance, Arc::clone(window)) }
        .wrap_err("Failed to create surface")?;
    Ok(Arc::new(surface))
}

impl Live {
    fn new(surface: Arc<Surface<Window>>, session: Session) -> eyre::Result<Self> {
        let mut live = Self {
            presenter: None,
            surface,
            session,
            resize_pending: false,
        };
        live.ensure_presenter()?;
        live.session.window.request_redraw();
        Ok(live)
    }

    fn resume(session: Session) -> eyre::Result<Self> {
        let surface = attach_surface(&session.instance, &session.window)?;
        Self::new(surface, session)
    }

    fn suspend(self) -> Session {
        let Self {
            presenter,
            surface,
            session,
            ..
        } = self;
        drop(presenter);
        drop(surface);
        session
    }

    /// Build the presenter unless it exists. Stays `None` while the window
    /// is zero-sized.
    fn ensure_presenter(&mut self) -> eyre::Result<Option<&mut Presenter<Window>>> {
        if self.presenter.is_none() {
            let window = Arc::clone(&self.session.window);
            let extent_source = Box::new(move || {
                let PhysicalSize { width, height } = window.inner_size();
                vk::Extent2D { width, height }
            });
            let session = &self.session;
            match Presenter::new(
                &session.device,
                &self.surface,
                extent_source,
                &session.assets.scene(),
                &session.presenter_config,
            ) {
                Ok(presenter) => {
                    self.presenter = Some(presenter);
                    self.resize_pending = false;
                }
                Err(CreatePresenterError::Swapchain(RecreateError::ZeroExtent)) => {
                    tracing::trace!("Window is zero-sized, presenter deferred");
                }
                Err(e) => return Err(e).wrap_err("Failed to create presenter"),
            }
        }
        Ok(self.presenter.as_mut())
    }

    /// Draw one frame. Returns the control flow to run under: `Wait` while
    /// the window is zero-sized, so a minimized window idles until the next
    /// `Resized` event instead of redrawing in a loop.
    fn redraw(&mut self) -> eyre::Result<ControlFlow> {
        let resize_requested = std::mem::take(&mut self.resize_pending);
        let started = self.session.started;
        let shaded = self.session.assets.has_shaders();
        let Some(presenter) = self.ensure_presenter()? else {
            return Ok(control_flow_after(None));
        };

        let uniforms = shaded
            .then(|| SceneUniforms::at(started.elapsed().as_secs_f32(), presenter.extent()));
        let outcome = presenter
            .draw_frame(FrameRequest {
                resize_requested,
                uniforms: uniforms.as_ref().map(bytemuck::bytes_of),
            })
            .wrap_err("Failed to draw frame")?;

        match outcome {
            FrameOutcome::Presented { recreated: true, .. }
            | FrameOutcome::Abandoned { recreated: true } => {
                let vk::Extent2D { width, height } = presenter.extent();
                tracing::trace!(
                    "Swapchain generation {} at {width}x{height}",
                    presenter.swapchain_generation()
                );
            }
            FrameOutcome::Deferred => tracing::trace!("Window is zero-sized, frame skipped"),
            _ => {}
        }
        let flow = control_flow_after(Some(&outcome));
        if flow == ControlFlow::Poll {
            self.session.window.request_redraw();
        }
        Ok(flow)
    }

    fn toggle_polygon_mode(&mut self) {
        if !self.session.device.has_dynamic_polygon_mode() {
            tracing::warn!("Toggling polygon mode needs --dynamic-polygon-mode");
            return;
        }
        let config = &mut self.session.presenter_config;
        config.polygon_mode = next_polygon_mode(config.polygon_mode);
        if let Some(presenter) = &mut self.presenter {
            presenter.set_polygon_mode(config.polygon_mode);
        }
        tracing::info!("Polygon mode is now {:?}", config.polygon_mode);
    }
}

/// `None` means no presenter could be built yet.
fn control_flow_after(outcome: Option<&FrameOutcome>) -> ControlFlow {
    match outcome {
        None | Some(FrameOutcome::Deferred) => ControlFlow::Wait,
        Some(_) => ControlFlow::Poll,
    }
}

fn next_polygon_mode(mode: vk::PolygonMode) -> vk::PolygonMode {
    if mode == vk::PolygonMode::LINE {
        vk::PolygonMode::FILL
    } else {
        vk::PolygonMode::LINE
    }
}

fn is_toggle_key(event: &KeyEvent) -> bool {
    event.state == ElementState::Pressed
        && !event.repeat
        && event.logical_key.as_ref() == Key::Character("p")
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let next = match std::mem::replace(&mut self.phase, Phase::Exited) {
            Phase::Launching(pending) => launch(event_loop, pending).map(Phase::Live),
            Phase::Suspended(session) => Live::resume(session).map(Phase::Live),
            other => {
                tracing::warn!("Resumed while {}", other.name());
                self.phase = other;
                return;
            }
        };
        event_loop.set_control_flow(ControlFlow::Poll);
        self.enter(event_loop, next);
    }

    fn suspended(&mut self, event_loop: &ActiveEventLoop) {
        match std::mem::replace(&mut self.phase, Phase::Exited) {
            Phase::Live(live) => {
                event_loop.set_control_flow(ControlFlow::Wait);
                self.enter(event_loop, Ok(Phase::Suspended(live.suspend())));
            }
            other => self.phase = other,
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(live) = self.live_for(window_id) else {
            return;
        };
        let result = match event {
            WindowEvent::CloseRequested => Err(None),
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                live.resize_pending = true;
                live.session.window.request_redraw();
                Ok(())
            }
            WindowEvent::KeyboardInput { event, .. } if is_toggle_key(&event) => {
                live.toggle_polygon_mode();
                Ok(())
            }
            WindowEvent::RedrawRequested => live
                .redraw()
                .map(|flow| event_loop.set_control_flow(flow))
                .map_err(Some),
            _ => Ok(()),
        };
        match result {
            Ok(()) => {}
            Err(None) => {
                tracing::trace!("Close requested");
                self.enter(event_loop, Ok(Phase::Exited));
            }
            Err(Some(e)) => self.enter(event_loop, Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_mode_toggles_between_fill_and_line() {
        assert_eq!(next_polygon_mode(vk::PolygonMode::FILL), vk::PolygonMode::LINE);
        assert_eq!(next_polygon_mode(vk::PolygonMode::LINE), vk::PolygonMode::FILL);
        assert_eq!(next_polygon_mode(vk::PolygonMode::POINT), vk::PolygonMode::LINE);
    }

    #[test]
    fn zero_sized_windows_wait_for_events() {
        assert_eq!(control_flow_after(None), ControlFlow::Wait);
        assert_eq!(
            control_flow_after(Some(&FrameOutcome::Deferred)),
            ControlFlow::Wait
        );
        assert_eq!(
            control_flow_after(Some(&FrameOutcome::Abandoned { recreated: true })),
            ControlFlow::Poll
        );
        assert_eq!(
            control_flow_after(Some(&FrameOutcome::Presented {
                slot: 0,
                image_index: 1,
                recreated: false,
            })),
            ControlFlow::Poll
        );
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Exited.name(), "exited");
    }
}
