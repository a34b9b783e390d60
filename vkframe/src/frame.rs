//! Frame pacing.
//!
//! A frame tick walks `WaitFence -> Acquire -> Record -> Submit -> Present
//! -> Advance` on one slot of a fixed ring. [`FrameSynchronizer`] owns the
//! ordering and the recreation bookkeeping. Everything that touches the GPU
//! goes through [`FrameOps`], so the state machine can be driven by a
//! simulated GPU in tests.
//!
//! Only two kinds of results are recoverable: [`AcquireStatus`] and
//! [`PresentStatus`]. Every other failure comes back as the ops' error type
//! and ends the tick.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::swapchain_manager::RecreateStatus;
use crate::sync::{CreateFenceError, CreateSemaphoreError, Fence, Semaphore};

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// The image can be rendered to. A suboptimal image is still usable, but
    /// the swapchain should be rebuilt after presenting it.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. Nothing was acquired and
    /// the image-acquired semaphore stays unsignaled.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Sort the result of `vkAcquireNextImageKHR` into the transient outcomes.
/// Any other error code is returned unchanged.
pub fn classify_acquire(
    result: Result<(u32, bool), vk::Result>,
) -> Result<AcquireStatus, vk::Result> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireStatus::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(e) => Err(e),
    }
}

/// Sort the result of `vkQueuePresentKHR` into the transient outcomes.
/// Any other error code is returned unchanged.
pub fn classify_present(
    result: Result<bool, vk::Result>,
) -> Result<PresentStatus, vk::Result> {
    match result {
        Ok(false) => Ok(PresentStatus::Presented),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// FrameSlot
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateFrameSlotError {
    #[error("Failed to create frame slot semaphore: {0}")]
    Semaphore(#[from] CreateSemaphoreError),
    #[error("Failed to create frame slot fence: {0}")]
    Fence(#[from] CreateFenceError),
}

/// The synchronization triple for one in-flight frame.
///
/// Slots are created once and reused for the whole session. A swapchain
/// recreation does not touch them.
#[derive(Debug)]
pub struct FrameSlot {
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_acquired: Semaphore,
    /// Signaled by the graphics submission, waited on by present.
    pub render_finished: Semaphore,
    /// Signaled when the slot's GPU work completes. Created signaled so the
    /// first wait on each slot returns at once.
    pub in_flight: Fence,
}

impl FrameSlot {
    pub fn new(
        device: &Arc<Device>,
        index: usize,
    ) -> Result<Self, CreateFrameSlotError> {
        Ok(Self {
            image_acquired: Semaphore::new(
                device,
                Some(&format!("Frame {index} image acquired")),
            )?,
            render_finished: Semaphore::new(
                device,
                Some(&format!("Frame {index} render finished")),
            )?,
            in_flight: Fence::new(
                device,
                true,
                Some(&format!("Frame {index} in flight")),
            )?,
        })
    }

    /// Build the ring of `count` slots.
    pub fn ring(
        device: &Arc<Device>,
        count: NonZeroUsize,
    ) -> Result<Vec<Self>, CreateFrameSlotError> {
        (0..count.get()).map(|i| Self::new(device, i)).collect()
    }
}

// ---------------------------------------------------------------------------
// FrameOps
// ---------------------------------------------------------------------------

/// The GPU side of a frame tick, addressed by slot index.
///
/// [`FrameSynchronizer::tick`] calls these in a fixed order. Implementations
/// only carry out the step they are asked for.
pub trait FrameOps {
    type Error;

    /// Block until the slot's fence is signaled.
    fn wait_for_fence(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Acquire the next image, signaling the slot's image-acquired
    /// semaphore.
    fn acquire_image(
        &mut self,
        slot: usize,
    ) -> Result<AcquireStatus, Self::Error>;

    /// Unsignal the slot's fence. Only called after a successful acquire.
    fn reset_fence(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Re-record the slot's command buffer for `image_index`.
    fn record(
        &mut self,
        slot: usize,
        image_index: u32,
    ) -> Result<(), Self::Error>;

    /// Submit the slot's command buffer. It waits on image-acquired at
    /// `COLOR_ATTACHMENT_OUTPUT` and signals render-finished plus the
    /// slot's fence.
    fn submit(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Present `image_index` once render-finished is signaled.
    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
    ) -> Result<PresentStatus, Self::Error>;

    /// Rebuild the swapchain generation.
    fn recreate(&mut self) -> Result<RecreateStatus, Self::Error>;
}

// ---------------------------------------------------------------------------
// FrameSynchronizer
// ---------------------------------------------------------------------------

/// What one [`FrameSynchronizer::tick`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented from `slot`.
    Presented {
        slot: usize,
        image_index: u32,
        recreated: bool,
    },
    /// Acquire reported out of date. Nothing was submitted and the slot is
    /// retried on the next tick.
    Abandoned { recreated: bool },
    /// A recreation is pending but the window is still zero-sized. Nothing
    /// was waited on, acquired or submitted.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct FrameSynchronizer {
    frames_in_flight: usize,
    current_slot: usize,
    resize_pending: bool,
    recreate_pending: bool,
}

impl FrameSynchronizer {
    pub fn new(frames_in_flight: NonZeroUsize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.get(),
            current_slot: 0,
            resize_pending: false,
            recreate_pending: false,
        }
    }

    /// Run one frame.
    ///
    /// `resize_requested` is the window's best-effort resize flag. It is
    /// remembered until a recreation succeeds.
    ///
    /// The slot's fence is reset only after an image was acquired, so an
    /// abandoned tick leaves it signaled and the next wait returns at once.
    /// The slot index only advances after a present.
    pub fn tick<O: FrameOps>(
        &mut self,
        ops: &mut O,
        resize_requested: bool,
    ) -> Result<FrameOutcome, O::Error> {
        self.resize_pending |= resize_requested;

        let mut recreated = false;
        if self.recreate_pending {
            if !self.recreate(ops)? {
                return Ok(FrameOutcome::Deferred);
            }
            recreated = true;
        }

        let slot = self.current_slot;
        ops.wait_for_fence(slot)?;

        let (image_index, suboptimal) = match ops.acquire_image(slot)? {
            AcquireStatus::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireStatus::OutOfDate => {
                tracing::debug!("Swapchain out of date at acquire");
                recreated |= self.recreate(ops)?;
                return Ok(FrameOutcome::Abandoned { recreated });
            }
        };

        ops.reset_fence(slot)?;
        ops.record(slot, image_index)?;
        ops.submit(slot)?;
        let presented = ops.present(slot, image_index)?;

        if presented != PresentStatus::Presented
            || suboptimal
            || self.resize_pending
        {
            tracing::debug!(
                ?presented,
                suboptimal,
                resize_pending = self.resize_pending,
                "Recreating swapchain after present"
            );
            recreated |= self.recreate(ops)?;
        }

        self.current_slot = (slot + 1) % self.frames_in_flight;
        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            recreated,
        })
    }

    /// Returns whether a new generation was built. A deferred recreation is
    /// kept pending.
    fn recreate<O: FrameOps>(&mut self, ops: &mut O) -> Result<bool, O::Error> {
        match ops.recreate()? {
            RecreateStatus::Rebuilt => {
                self.recreate_pending = false;
                self.resize_pending = false;
                Ok(true)
            }
            RecreateStatus::Deferred => {
                self.recreate_pending = true;
                Ok(false)
            }
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        GpuDone(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
    }

    #[derive(Debug, PartialEq, Eq)]
    enum SimError {
        Deadlock(usize),
        ResetWhilePending(usize),
        ResetUnsignaled(usize),
        RecordWhilePending(usize),
        SubmitWithSignaledFence(usize),
        TooManyInFlight(usize),
        DeviceLost,
    }

    /// A GPU that finishes submissions in order, only when someone waits
    /// or when the test advances it.
    struct SimGpu {
        frames_in_flight: usize,
        signaled: Vec<bool>,
        pending: VecDeque<usize>,
        acquire_script: VecDeque<AcquireStatus>,
        present_script: VecDeque<PresentStatus>,
        recreate_script: VecDeque<RecreateStatus>,
        lose_device_on_acquire: bool,
        image_count: u32,
        next_image: u32,
        log: Vec<Event>,
        max_in_flight: usize,
        recreations: usize,
    }

    impl SimGpu {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                frames_in_flight,
                signaled: vec![true; frames_in_flight],
                pending: VecDeque::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                recreate_script: VecDeque::new(),
                lose_device_on_acquire: false,
                image_count: 3,
                next_image: 0,
                log: Vec::new(),
                max_in_flight: 0,
                recreations: 0,
            }
        }

        fn complete_oldest(&mut self) -> bool {
            match self.pending.pop_front() {
                Some(slot) => {
                    self.signaled[slot] = true;
                    self.log.push(Event::GpuDone(slot));
                    true
                }
                None => false,
            }
        }

        fn take_log(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.log)
        }
    }

    impl FrameOps for SimGpu {
        type Error = SimError;

        fn wait_for_fence(&mut self, slot: usize) -> Result<(), SimError> {
            self.log.push(Event::Wait(slot));
            while !self.signaled[slot] {
                if !self.complete_oldest() {
                    return Err(SimError::Deadlock(slot));
                }
            }
            Ok(())
        }

        fn acquire_image(
            &mut self,
            slot: usize,
        ) -> Result<AcquireStatus, SimError> {
            self.log.push(Event::Acquire(slot));
            if self.lose_device_on_acquire {
                return Err(SimError::DeviceLost);
            }
            let status = self.acquire_script.pop_front().unwrap_or(
                AcquireStatus::Acquired {
                    image_index: self.next_image,
                    suboptimal: false,
                },
            );
            if let AcquireStatus::Acquired { .. } = status {
                self.next_image = (self.next_image + 1) % self.image_count;
            }
            Ok(status)
        }

        fn reset_fence(&mut self, slot: usize) -> Result<(), SimError> {
            if self.pending.contains(&slot) {
                return Err(SimError::ResetWhilePending(slot));
            }
            if !self.signaled[slot] {
                return Err(SimError::ResetUnsignaled(slot));
            }
            self.signaled[slot] = false;
            self.log.push(Event::Reset(slot));
            Ok(())
        }

        fn record(
            &mut self,
            slot: usize,
            image_index: u32,
        ) -> Result<(), SimError> {
            if self.pending.contains(&slot) {
                return Err(SimError::RecordWhilePending(slot));
            }
            self.log.push(Event::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<(), SimError> {
            if self.signaled[slot] {
                return Err(SimError::SubmitWithSignaledFence(slot));
            }
            self.pending.push_back(slot);
            if self.pending.len() > self.frames_in_flight {
                return Err(SimError::TooManyInFlight(self.pending.len()));
            }
            self.max_in_flight = self.max_in_flight.max(self.pending.len());
            self.log.push(Event::Submit(slot));
            Ok(())
        }

        fn present(
            &mut self,
            slot: usize,
            image_index: u32,
        ) -> Result<PresentStatus, SimError> {
            self.log.push(Event::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentStatus::Presented))
        }

        fn recreate(&mut self) -> Result<RecreateStatus, SimError> {
            self.log.push(Event::Recreate);
            let status = self
                .recreate_script
                .pop_front()
                .unwrap_or(RecreateStatus::Rebuilt);
            if status == RecreateStatus::Rebuilt {
                self.recreations += 1;
            }
            Ok(status)
        }
    }

    fn synchronizer(frames_in_flight: usize) -> FrameSynchronizer {
        FrameSynchronizer::new(NonZeroUsize::new(frames_in_flight).unwrap())
    }

    /// Small deterministic generator so the long run is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            self.0 >> 33
        }
    }

    #[test]
    fn classifies_acquire_results() {
        assert_eq!(
            classify_acquire(Ok((2, false))),
            Ok(AcquireStatus::Acquired {
                image_index: 2,
                suboptimal: false
            })
        );
        assert_eq!(
            classify_acquire(Ok((0, true))),
            Ok(AcquireStatus::Acquired {
                image_index: 0,
                suboptimal: true
            })
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(AcquireStatus::OutOfDate)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }

    #[test]
    fn classifies_present_results() {
        assert_eq!(classify_present(Ok(false)), Ok(PresentStatus::Presented));
        assert_eq!(classify_present(Ok(true)), Ok(PresentStatus::Suboptimal));
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(PresentStatus::OutOfDate)
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        );
    }

    #[test]
    fn plain_tick_runs_every_stage_in_order() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);

        let outcome = sync.tick(&mut gpu, false).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                recreated: false
            }
        );
        assert_eq!(
            gpu.take_log(),
            vec![
                Event::Wait(0),
                Event::Acquire(0),
                Event::Reset(0),
                Event::Record(0, 0),
                Event::Submit(0),
                Event::Present(0, 0),
            ]
        );
        assert_eq!(sync.current_slot(), 1);
    }

    #[test]
    fn out_of_date_acquire_keeps_fence_and_slot() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.acquire_script.push_back(AcquireStatus::OutOfDate);

        let outcome = sync.tick(&mut gpu, false).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned { recreated: true });
        assert_eq!(
            gpu.take_log(),
            vec![Event::Wait(0), Event::Acquire(0), Event::Recreate]
        );
        assert_eq!(sync.current_slot(), 0);
        assert!(gpu.signaled[0], "fence must stay signaled");

        // The retry waits on the same, still signaled, fence.
        let outcome = sync.tick(&mut gpu, false).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                recreated: false
            }
        );
        let log = gpu.take_log();
        assert_eq!(log[0], Event::Wait(0));
        assert!(!log.iter().any(|e| matches!(e, Event::GpuDone(_))));
    }

    #[test]
    fn third_frame_waits_for_slot_zero() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);

        sync.tick(&mut gpu, false).unwrap();
        sync.tick(&mut gpu, false).unwrap();
        assert_eq!(gpu.pending, VecDeque::from([0, 1]));
        gpu.take_log();

        let outcome = sync.tick(&mut gpu, false).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { slot: 0, .. }));

        let log = gpu.take_log();
        let done = log.iter().position(|e| *e == Event::GpuDone(0));
        let reset = log.iter().position(|e| *e == Event::Reset(0));
        assert_eq!(log[0], Event::Wait(0));
        assert!(done.is_some() && done < reset);
        // Slot 1 keeps running while slot 0 is reused.
        assert!(!log.contains(&Event::GpuDone(1)));
    }

    #[test]
    fn suboptimal_present_triggers_recreate() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.present_script.push_back(PresentStatus::Suboptimal);

        let outcome = sync.tick(&mut gpu, false).unwrap();

        assert!(matches!(
            outcome,
            FrameOutcome::Presented {
                recreated: true,
                ..
            }
        ));
        assert_eq!(gpu.log.last(), Some(&Event::Recreate));
        assert_eq!(sync.current_slot(), 1);
    }

    #[test]
    fn suboptimal_acquire_presents_then_recreates() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.acquire_script.push_back(AcquireStatus::Acquired {
            image_index: 1,
            suboptimal: true,
        });

        let outcome = sync.tick(&mut gpu, false).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 1,
                recreated: true
            }
        );
        let log = gpu.take_log();
        let present = log.iter().position(|e| *e == Event::Present(0, 1));
        let recreate = log.iter().position(|e| *e == Event::Recreate);
        assert!(present < recreate);
    }

    #[test]
    fn out_of_date_present_triggers_recreate() {
        let mut gpu = SimGpu::new(1);
        let mut sync = synchronizer(1);
        gpu.present_script.push_back(PresentStatus::OutOfDate);

        let outcome = sync.tick(&mut gpu, false).unwrap();

        assert!(matches!(
            outcome,
            FrameOutcome::Presented {
                recreated: true,
                ..
            }
        ));
        assert_eq!(gpu.recreations, 1);
    }

    #[test]
    fn resize_flag_recreates_once_and_clears() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);

        let first = sync.tick(&mut gpu, true).unwrap();
        assert!(matches!(
            first,
            FrameOutcome::Presented {
                recreated: true,
                ..
            }
        ));
        assert!(!sync.is_resize_pending());

        let second = sync.tick(&mut gpu, false).unwrap();
        assert!(matches!(
            second,
            FrameOutcome::Presented {
                recreated: false,
                ..
            }
        ));
        assert_eq!(gpu.recreations, 1);
    }

    #[test]
    fn acquire_recreation_clears_resize_flag() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.acquire_script.push_back(AcquireStatus::OutOfDate);

        sync.tick(&mut gpu, true).unwrap();
        assert!(!sync.is_resize_pending());

        sync.tick(&mut gpu, false).unwrap();
        assert_eq!(gpu.recreations, 1);
    }

    #[test]
    fn minimized_window_defers_until_sized() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.acquire_script.push_back(AcquireStatus::OutOfDate);
        gpu.recreate_script.extend([
            RecreateStatus::Deferred,
            RecreateStatus::Deferred,
            RecreateStatus::Deferred,
            RecreateStatus::Rebuilt,
        ]);

        let outcome = sync.tick(&mut gpu, false).unwrap();
        assert_eq!(outcome, FrameOutcome::Abandoned { recreated: false });
        assert!(sync.is_recreate_pending());
        gpu.take_log();

        for _ in 0..2 {
            let outcome = sync.tick(&mut gpu, true).unwrap();
            assert_eq!(outcome, FrameOutcome::Deferred);
            // Nothing but the recreation attempt happens while minimized.
            assert_eq!(gpu.take_log(), vec![Event::Recreate]);
        }

        let outcome = sync.tick(&mut gpu, false).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                recreated: true
            }
        );
        assert!(!sync.is_recreate_pending());
        assert!(!sync.is_resize_pending());
        assert_eq!(gpu.take_log()[0], Event::Recreate);
    }

    #[test]
    fn fatal_error_stops_the_tick() {
        let mut gpu = SimGpu::new(2);
        let mut sync = synchronizer(2);
        gpu.lose_device_on_acquire = true;

        assert_eq!(sync.tick(&mut gpu, false), Err(SimError::DeviceLost));
        assert_eq!(sync.current_slot(), 0);
        assert!(gpu.pending.is_empty());
        assert!(gpu.signaled[0]);
    }

    #[test]
    fn never_more_than_f_slots_unfenced() {
        for frames_in_flight in 1..=3 {
            let mut gpu = SimGpu::new(frames_in_flight);
            let mut sync = synchronizer(frames_in_flight);
            let mut rng = Lcg(0x5eed + frames_in_flight as u64);
            let mut expected_slot = 0;
            let mut presented = 0;

            for _ in 0..500 {
                for _ in 0..rng.next() % 3 {
                    gpu.complete_oldest();
                }
                match rng.next() % 12 {
                    0 => gpu.acquire_script.push_back(AcquireStatus::OutOfDate),
                    1 => gpu.acquire_script.push_back(AcquireStatus::Acquired {
                        image_index: 0,
                        suboptimal: true,
                    }),
                    _ => {}
                }
                match rng.next() % 12 {
                    0 => gpu.present_script.push_back(PresentStatus::OutOfDate),
                    1 => gpu.present_script.push_back(PresentStatus::Suboptimal),
                    _ => {}
                }
                if rng.next() % 20 == 0 {
                    gpu.recreate_script.push_back(RecreateStatus::Deferred);
                }
                let resize = rng.next() % 15 == 0;

                match sync.tick(&mut gpu, resize).unwrap() {
                    FrameOutcome::Presented { slot, .. } => {
                        assert_eq!(slot, expected_slot);
                        expected_slot = (expected_slot + 1) % frames_in_flight;
                        presented += 1;
                    }
                    FrameOutcome::Abandoned { .. } | FrameOutcome::Deferred => {
                        assert_eq!(sync.current_slot(), expected_slot);
                    }
                }
                assert!(gpu.pending.len() <= frames_in_flight);
            }

            assert!(gpu.max_in_flight <= frames_in_flight);
            assert!(presented > 300);
        }
    }
}
