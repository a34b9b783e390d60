//! Fences and semaphores for the frame ring.
//!
//! A [`Fence`] remembers whether a submission owns it. Waiting on a fence
//! that nothing will signal returns [`WaitFenceError::NotSubmitted`]
//! instead of blocking forever. A fence created signaled starts out as if
//! its submission had already completed.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateFenceError {
    #[error("Vulkan error creating frame fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum WaitFenceError {
    #[error("Timed out waiting for frame fence")]
    Timeout,
    #[error("Vulkan error waiting on frame fence: {0}")]
    Vulkan(vk::Result),
    #[error("Fence has no submission that would ever signal it")]
    NotSubmitted,
}

#[derive(Debug, Error)]
pub enum ResetFenceError {
    #[error("Fence reset without a completed submission")]
    NotSubmitted,
    #[error("Vulkan error resetting frame fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum MarkSubmittedError {
    #[error("Fence handed to a second submission before being reset")]
    AlreadySubmitted,
}

#[derive(Debug, Error)]
pub enum CreateSemaphoreError {
    #[error("Vulkan error creating frame semaphore: {0}")]
    Vulkan(vk::Result),
}

/// CPU-side view of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    /// Reset and not yet handed to a submission.
    Unsignaled,
    /// A submission owns it, or it has already signaled.
    InFlight,
}

impl FenceState {
    fn initial(signaled: bool) -> Self {
        if signaled { Self::InFlight } else { Self::Unsignaled }
    }

    fn check_wait(self) -> Result<(), WaitFenceError> {
        match self {
            Self::InFlight => Ok(()),
            Self::Unsignaled => Err(WaitFenceError::NotSubmitted),
        }
    }

    fn reset(self) -> Result<Self, ResetFenceError> {
        match self {
            Self::InFlight => Ok(Self::Unsignaled),
            Self::Unsignaled => Err(ResetFenceError::NotSubmitted),
        }
    }

    fn submit(self) -> Result<Self, MarkSubmittedError> {
        match self {
            Self::Unsignaled => Ok(Self::InFlight),
            Self::InFlight => Err(MarkSubmittedError::AlreadySubmitted),
        }
    }
}

/// A binary fence the CPU waits on before reusing a frame slot.
pub struct Fence {
    parent: Arc<Device>,
    handle: vk::Fence,
    state: FenceState,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Fence {
    /// A frame slot creates its fence signaled so the first wait on the
    /// slot returns at once.
    pub fn new(
        device: &Arc<Device>,
        signaled: bool,
        name: Option<&str>,
    ) -> Result<Self, CreateFenceError> {
        let create_info = vk::FenceCreateInfo::default().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        // SAFETY: plain create info, nothing borrowed.
        let handle = unsafe { device.create_raw_fence(&create_info) }
            .map_err(CreateFenceError::Vulkan)?;

        // SAFETY: the fence was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name fence {handle:?}: {e}");
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            state: FenceState::initial(signaled),
        })
    }

    /// Block until the owning submission completes, or `timeout_ns`
    /// passes. `u64::MAX` waits without limit.
    ///
    /// A completed fence stays signaled, so waiting twice is fine.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), WaitFenceError> {
        self.state.check_wait()?;
        // SAFETY: the fence belongs to parent and outlives the call.
        let result = unsafe {
            self.parent
                .wait_for_raw_fences(&[self.handle], true, timeout_ns)
        };
        result.map_err(|e| match e {
            vk::Result::TIMEOUT => WaitFenceError::Timeout,
            e => WaitFenceError::Vulkan(e),
        })
    }

    /// Unsignal the fence so it can go with the next submission.
    ///
    /// # Safety
    /// No queue may still own the fence: a [`wait`](Self::wait) must have
    /// succeeded since its last submission.
    pub unsafe fn reset(&mut self) -> Result<(), ResetFenceError> {
        let next = self.state.reset()?;
        // SAFETY: the caller guarantees the fence is idle.
        unsafe { self.parent.reset_raw_fences(&[self.handle]) }
            .map_err(ResetFenceError::Vulkan)?;
        self.state = next;
        Ok(())
    }

    /// Note that a queue submission now owns the fence.
    ///
    /// # Safety
    /// The fence must really have been passed to a submission that signals
    /// it. Otherwise a later [`wait`](Self::wait) never returns.
    pub unsafe fn mark_submitted(&mut self) -> Result<(), MarkSubmittedError> {
        self.state = self.state.submit()?;
        Ok(())
    }

    pub fn raw_fence(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("Dropping fence {:?}", self.handle);
        // SAFETY: owners drop fences only after the device went idle.
        unsafe { self.parent.destroy_raw_fence(self.handle) };
    }
}

/// A binary semaphore ordering GPU work: acquire before render, render
/// before present.
pub struct Semaphore {
    parent: Arc<Device>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Semaphore {
    pub fn new(
        device: &Arc<Device>,
        name: Option<&str>,
    ) -> Result<Self, CreateSemaphoreError> {
        // SAFETY: default create info, nothing borrowed.
        let handle = unsafe {
            device.create_raw_semaphore(&vk::SemaphoreCreateInfo::default())
        }
        .map_err(CreateSemaphoreError::Vulkan)?;

        // SAFETY: the semaphore was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name semaphore {handle:?}: {e}");
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_semaphore(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!("Dropping semaphore {:?}", self.handle);
        // SAFETY: owners drop semaphores only after the device went idle,
        // so no wait or signal on it is pending.
        unsafe { self.parent.destroy_raw_semaphore(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaled_fence_can_be_waited_first() {
        assert!(FenceState::initial(true).check_wait().is_ok());
        assert!(matches!(
            FenceState::initial(false).check_wait(),
            Err(WaitFenceError::NotSubmitted)
        ));
    }

    #[test]
    fn frame_cycle_wait_reset_submit() {
        let state = FenceState::initial(true);
        assert!(state.check_wait().is_ok());
        let state = state.reset().ok().unwrap();
        assert_eq!(state, FenceState::Unsignaled);
        let state = state.submit().ok().unwrap();
        assert_eq!(state, FenceState::InFlight);
        assert!(state.check_wait().is_ok());
    }

    #[test]
    fn reset_twice_is_rejected() {
        let state = FenceState::initial(true).reset().ok().unwrap();
        assert!(matches!(state.reset(), Err(ResetFenceError::NotSubmitted)));
    }

    #[test]
    fn double_submit_is_rejected() {
        assert!(matches!(
            FenceState::InFlight.submit(),
            Err(MarkSubmittedError::AlreadySubmitted)
        ));
    }
}
