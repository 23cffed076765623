// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct and efficient multi-frame rendering

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device: device.clone(),
        };

        unsafe {
            sync.image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            sync.render_finished = device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            sync.in_flight = device
                .device
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;
        }

        Ok(sync)
    }

    /// One sync slot per frame in flight
    pub fn create_frames(device: &Arc<VulkanDevice>, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::new(device)).collect()
    }

    pub fn wait(&self) -> Result<()> {
        wait_for_fence(&self.device, self.in_flight)
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight]) }
            .context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Null handles are ignored by the destroy calls
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight, None);
        }
    }
}

pub fn wait_for_fence(device: &VulkanDevice, fence: vk::Fence) -> Result<()> {
    unsafe { device.device.wait_for_fences(&[fence], true, u64::MAX) }
        .context("Failed to wait for fence")
}

/// CPU-side bookkeeping for frames in flight.
///
/// Tracks which frame slot is being recorded and which slot last rendered
/// into each swapchain image, so an image is never reused while a previous
/// frame still targets it.
#[derive(Debug, Clone)]
pub struct FramePacer {
    current_frame: usize,
    frames_in_flight: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            current_frame: 0,
            frames_in_flight: frames_in_flight.max(1),
            images_in_flight: vec![None; image_count],
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Mark `image` as owned by the current slot.
    ///
    /// Returns the slot that owned it before, whose fence must be waited on
    /// before the image is touched again. A slot never waits on itself.
    pub fn claim_image(&mut self, image: usize) -> Option<usize> {
        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }

        let previous = self.images_in_flight[image].replace(self.current_frame);
        previous.filter(|&slot| slot != self.current_frame)
    }

    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
    }

    /// Forget image ownership after the swapchain is rebuilt
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    #[cfg(test)]
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps() {
        let mut pacer = FramePacer::new(2, 3);
        assert_eq!(pacer.current_frame(), 0);
        pacer.advance();
        assert_eq!(pacer.current_frame(), 1);
        pacer.advance();
        assert_eq!(pacer.current_frame(), 0);
    }

    #[test]
    fn zero_frames_is_treated_as_one() {
        let mut pacer = FramePacer::new(0, 2);
        assert_eq!(pacer.frames_in_flight(), 1);
        pacer.advance();
        assert_eq!(pacer.current_frame(), 0);
    }

    #[test]
    fn fresh_image_needs_no_wait() {
        let mut pacer = FramePacer::new(2, 3);
        assert_eq!(pacer.claim_image(1), None);
        assert_eq!(pacer.image_owner(1), Some(0));
    }

    #[test]
    fn image_held_by_other_slot_reports_it() {
        let mut pacer = FramePacer::new(2, 3);
        assert_eq!(pacer.claim_image(2), None);
        pacer.advance();
        assert_eq!(pacer.claim_image(2), Some(0));
        assert_eq!(pacer.image_owner(2), Some(1));
    }

    #[test]
    fn same_slot_does_not_wait_on_itself() {
        let mut pacer = FramePacer::new(2, 3);
        pacer.claim_image(0);
        pacer.advance();
        pacer.claim_image(1);
        pacer.advance();
        // Slot 0 again; its own fence was already waited on
        assert_eq!(pacer.claim_image(0), None);
    }

    #[test]
    fn round_robin_over_three_images() {
        let mut pacer = FramePacer::new(2, 3);
        let mut waits = Vec::new();
        for frame in 0..6 {
            waits.push(pacer.claim_image(frame % 3));
            pacer.advance();
        }
        assert_eq!(waits, vec![None, None, None, Some(0), Some(1), Some(0)]);
    }

    #[test]
    fn reset_images_resizes_and_clears() {
        let mut pacer = FramePacer::new(2, 2);
        pacer.claim_image(0);
        pacer.claim_image(1);
        pacer.advance();

        pacer.reset_images(4);
        for image in 0..4 {
            assert_eq!(pacer.image_owner(image), None);
        }
        assert_eq!(pacer.current_frame(), 1);
        assert_eq!(pacer.claim_image(3), None);
    }

    #[test]
    fn out_of_range_image_grows_table() {
        let mut pacer = FramePacer::new(2, 1);
        assert_eq!(pacer.claim_image(3), None);
        assert_eq!(pacer.image_owner(3), Some(0));
    }
}
