// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::device::GpuDevice;

/// Recycles "image acquired" semaphores.
///
/// A semaphore handed to `acquire_next_image` can only be reused once the
/// submission that waited on it has retired, so each acquire takes a fresh or
/// recycled handle and the previous one comes back here after its frame's fence
/// has been waited on.
#[derive(Debug, Default)]
pub struct SemaphorePool {
    free: Vec<vk::Semaphore>,
    created: usize,
}

impl SemaphorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<D: GpuDevice + ?Sized>(&mut self, device: &D) -> VkResult<vk::Semaphore> {
        if let Some(sem) = self.free.pop() {
            return Ok(sem);
        }
        let sem = device.create_semaphore()?;
        self.created += 1;
        Ok(sem)
    }

    /// The caller guarantees no pending signal or wait still references `semaphore`.
    pub fn release(&mut self, semaphore: vk::Semaphore) {
        if semaphore != vk::Semaphore::null() {
            self.free.push(semaphore);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total semaphores this pool has ever created.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Destroy the pooled handles. Semaphores currently lent out are the borrower's problem.
    pub fn destroy<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        for sem in self.free.drain(..) {
            device.destroy_semaphore(sem);
        }
    }
}
