//! Swapchain presentation, frame pacing and GPU resource lifecycle on top
//! of [`ash`].
//!
//! # Object hierarchy
//!
//! ```text
//! Instance
//! ├── Surface<T>
//! └── Device
//!     └── Presenter<T>
//!         ├── FrameSynchronizer + FrameSlot ring (Semaphore, Semaphore, Fence)
//!         ├── CommandRecorder (CommandPool → CommandBuffer)
//!         ├── GraphicsPipeline (ShaderModule → EntryPoint, PipelineLayout)
//!         ├── GpuResources
//!         │   ├── UniformSlots (HostVisibleBuffer, DescriptorSet)
//!         │   └── Geometry (DeviceLocalBuffer)
//!         └── SwapchainManager<T>
//!             ├── Swapchain<T>
//!             ├── RenderPass
//!             └── Framebuffers
//! ```
//!
//! Each wrapper holds its parent via `Arc` so parents cannot be
//! destroyed while children are alive. Owners declare their fields in
//! reverse creation order.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod presenter;
pub mod recorder;
pub mod render_pass;
pub mod resources;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;
pub mod vertex;

pub use ash;
pub use raw_window_handle::HandleError as RwhHandleError;
