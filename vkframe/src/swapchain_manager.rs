//! Swapchain recreation.
//!
//! [`SwapchainManager`] owns one swapchain generation: the swapchain, its
//! image views and one framebuffer per view. A generation is never patched.
//! [`SwapchainManager::recreate`] tears every per-image object down while
//! the device is idle and rebuilds the set from scratch.
//!
//! The render pass is created once from the first swapchain's format and
//! outlives every generation. Later swapchains are asked for the same
//! format so pipelines built against the pass stay compatible.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::Device;
use crate::render_pass::{
    CreateFramebufferError, CreateRenderPassError, Framebuffers, RenderPass,
};
use crate::surface::{FramebufferExtent, Surface};
use crate::swapchain::{CreateSwapchainError, Swapchain};

#[derive(Debug, Error)]
pub enum RecreateError {
    #[error("Window reports a zero-sized framebuffer")]
    ZeroExtent,

    #[error("Vulkan error waiting for the device to go idle: {0}")]
    WaitIdle(vk::Result),

    #[error(
        "Surface no longer offers format {expected:?}, got {found:?}; \
         the render pass and pipelines would be incompatible"
    )]
    FormatChanged {
        expected: vk::Format,
        found: vk::Format,
    },

    #[error("Failed to create swapchain: {0}")]
    Swapchain(#[from] CreateSwapchainError),

    #[error("Failed to create render pass: {0}")]
    RenderPass(#[from] CreateRenderPassError),

    #[error("Failed to create framebuffers: {0}")]
    Framebuffers(#[from] CreateFramebufferError),
}

/// Outcome of [`SwapchainManager::recreate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateStatus {
    /// A new generation is ready.
    Rebuilt,
    /// The window stayed zero-sized and no generation was built. The caller
    /// keeps the recreation pending and must not acquire until it succeeds.
    Deferred,
}

/// How long to wait for a minimized window to get a size again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentPoll {
    /// Sleep between two size queries.
    pub interval: Duration,
    /// Number of size queries before giving up. `None` waits forever.
    pub max_polls: Option<u32>,
}

impl Default for ExtentPoll {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(16),
            max_polls: None,
        }
    }
}

/// Query `source` until it reports a nonzero size, sleeping
/// `poll.interval` between queries.
///
/// Returns `None` once `poll.max_polls` queries all came back zero.
pub fn wait_for_nonzero_extent<S, F>(
    source: &S,
    poll: &ExtentPoll,
    mut sleep: F,
) -> Option<vk::Extent2D>
where
    S: FramebufferExtent + ?Sized,
    F: FnMut(Duration),
{
    let mut polls = 0u32;
    loop {
        let extent = source.framebuffer_extent();
        polls = polls.saturating_add(1);
        if extent.width != 0 && extent.height != 0 {
            return Some(extent);
        }
        if poll.max_polls.is_some_and(|max| polls >= max) {
            return None;
        }
        sleep(poll.interval);
    }
}

/// One swapchain generation plus everything needed to build the next.
///
/// Fields are declared in drop order: framebuffers, then the swapchain
/// with its views, then the render pass and the surface.
pub struct SwapchainManager<T: HasDisplayHandle + HasWindowHandle> {
    framebuffers: Framebuffers,
    swapchain: Swapchain<T>,
    render_pass: RenderPass,
    surface: Arc<Surface<T>>,
    device: Arc<Device>,
    extent_source: Box<dyn FramebufferExtent>,
    extent_poll: ExtentPoll,
    generation: u64,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug
    for SwapchainManager<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapchainManager")
            .field("generation", &self.generation)
            .field("swapchain", &self.swapchain)
            .field("render_pass", &self.render_pass)
            .field("framebuffers", &self.framebuffers)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> SwapchainManager<T> {
    /// Build the first generation and the render pass.
    ///
    /// `preferred_format` only steers the first swapchain. Every later one
    /// is pinned to whatever format that swapchain got.
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        extent_source: Box<dyn FramebufferExtent>,
        preferred_format: Option<vk::Format>,
        extent_poll: ExtentPoll,
    ) -> Result<Self, RecreateError> {
        let extent = wait_for_nonzero_extent(
            extent_source.as_ref(),
            &extent_poll,
            std::thread::sleep,
        )
        .ok_or(RecreateError::ZeroExtent)?;

        let swapchain =
            Swapchain::new(device, surface, extent, preferred_format)?;
        let render_pass = RenderPass::new(device, swapchain.format())?;
        let framebuffers = Framebuffers::new(
            &render_pass,
            swapchain.image_views(),
            swapchain.extent(),
        )?;

        Ok(Self {
            framebuffers,
            swapchain,
            render_pass,
            surface: Arc::clone(surface),
            device: Arc::clone(device),
            extent_source,
            extent_poll,
            generation: 0,
        })
    }

    /// Replace the current generation.
    ///
    /// Blocks on the extent source while the window is zero-sized, then on
    /// the device going idle. Framebuffers and image views are destroyed
    /// before the new swapchain is created. The old swapchain is handed to
    /// the driver and destroyed only once its replacement exists.
    ///
    /// Calling this again with nothing changed produces an identical
    /// configuration.
    pub fn recreate(&mut self) -> Result<RecreateStatus, RecreateError> {
        let _span = tracing::info_span!(
            "swapchain_recreate",
            generation = self.generation
        )
        .entered();

        let Some(extent) = wait_for_nonzero_extent(
            self.extent_source.as_ref(),
            &self.extent_poll,
            std::thread::sleep,
        ) else {
            tracing::debug!("Window is zero-sized, deferring recreation");
            return Ok(RecreateStatus::Deferred);
        };

        self.device.wait_idle().map_err(RecreateError::WaitIdle)?;

        // SAFETY: the device is idle, so no submitted work references the
        // framebuffers or the views they wrap.
        unsafe {
            self.framebuffers.destroy_all();
            self.swapchain.destroy_image_views();
        }

        let expected = self.render_pass.format();
        let swapchain = match Swapchain::new_with_old(
            &self.device,
            &self.surface,
            extent,
            Some(&self.swapchain),
            Some(expected),
        ) {
            Ok(swapchain) => swapchain,
            // The surface can report a zero extent a moment before the
            // window does. The old swapchain stays, stripped of its views,
            // until the next attempt.
            Err(CreateSwapchainError::InvalidExtent { width, height }) => {
                tracing::debug!(
                    "Surface reports {width}x{height}, deferring recreation"
                );
                return Ok(RecreateStatus::Deferred);
            }
            Err(e) => return Err(e.into()),
        };
        if swapchain.format() != expected {
            return Err(RecreateError::FormatChanged {
                expected,
                found: swapchain.format(),
            });
        }

        // Dropping the old swapchain here destroys it after its
        // replacement took over the surface.
        drop(std::mem::replace(&mut self.swapchain, swapchain));

        self.framebuffers = Framebuffers::new(
            &self.render_pass,
            self.swapchain.image_views(),
            self.swapchain.extent(),
        )?;
        self.generation += 1;

        tracing::info!(
            "Swapchain generation {} ready at {}x{}",
            self.generation,
            self.swapchain.extent().width,
            self.swapchain.extent().height,
        );
        Ok(RecreateStatus::Rebuilt)
    }

    pub fn swapchain(&self) -> &Swapchain<T> {
        &self.swapchain
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn framebuffers(&self) -> &Framebuffers {
        &self.framebuffers
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Bumped by every successful recreation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Reports `sizes` in order, repeating the last one.
    struct Scripted {
        sizes: Vec<(u32, u32)>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl FramebufferExtent for Scripted {
        fn framebuffer_extent(&self) -> vk::Extent2D {
            let i = self.calls.fetch_add(1, Ordering::Relaxed);
            let (width, height) = self.sizes[i.min(self.sizes.len() - 1)];
            vk::Extent2D { width, height }
        }
    }

    fn scripted(sizes: &[(u32, u32)]) -> Scripted {
        Scripted {
            sizes: sizes.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn minimized_window_blocks_until_nonzero() {
        let source = scripted(&[(0, 0), (0, 0), (800, 600)]);
        let mut sleeps = 0;
        let extent =
            wait_for_nonzero_extent(&source, &ExtentPoll::default(), |_| {
                sleeps += 1
            });
        assert_eq!(
            extent,
            Some(vk::Extent2D {
                width: 800,
                height: 600
            })
        );
        assert_eq!(source.calls(), 3);
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn one_zero_dimension_counts_as_minimized() {
        let source = scripted(&[(800, 0), (0, 600), (1, 1)]);
        let extent =
            wait_for_nonzero_extent(&source, &ExtentPoll::default(), |_| {});
        assert_eq!(
            extent,
            Some(vk::Extent2D {
                width: 1,
                height: 1
            })
        );
    }

    #[test]
    fn bounded_poll_gives_up() {
        let source = scripted(&[(0, 0)]);
        let poll = ExtentPoll {
            interval: Duration::from_millis(5),
            max_polls: Some(4),
        };
        let mut slept = Duration::ZERO;
        let extent = wait_for_nonzero_extent(&source, &poll, |d| slept += d);
        assert_eq!(extent, None);
        assert_eq!(source.calls(), 4);
        assert_eq!(slept, Duration::from_millis(15));
    }

    #[test]
    fn nonzero_size_returns_without_sleeping() {
        let source = scripted(&[(1280, 720)]);
        let extent = wait_for_nonzero_extent(
            &source,
            &ExtentPoll {
                interval: Duration::from_secs(1),
                max_polls: Some(1),
            },
            |_| panic!("should not sleep"),
        );
        assert!(extent.is_some());
    }

    #[test]
    fn default_poll_is_unbounded() {
        assert_eq!(ExtentPoll::default().max_polls, None);
    }
}
