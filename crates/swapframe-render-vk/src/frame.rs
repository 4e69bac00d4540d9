// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot ↔ swapchain-image ownership.
//!
//! Two fixed-size tables with back-references: each frame slot knows which
//! image it holds, each image knows which slot holds it. An image is owned by
//! at most one slot at a time.

use ash::vk;

/// One frame-in-flight slot.
#[derive(Clone, Copy, Debug)]
pub struct FrameDrawRecord {
    /// Exclusively owned, swapped for a pooled one on every acquire.
    pub image_acquired: vk::Semaphore,
    pub image_released: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub swap_image: Option<u32>,
}

/// One presentable image.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwapchainRecord {
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub owner: Option<usize>,
}

/// The slot other than `frame` that currently holds `image`, if any. Its fence
/// must be waited on before `frame` takes the image over.
pub fn conflicting_owner(records: &[SwapchainRecord], frame: usize, image: u32) -> Option<usize> {
    records
        .get(image as usize)
        .and_then(|r| r.owner)
        .filter(|&owner| owner != frame)
}

/// Hand `image` to `frame` in both tables, clearing whatever either side held before.
pub fn assign_image(
    frames: &mut [FrameDrawRecord],
    records: &mut [SwapchainRecord],
    frame: usize,
    image: u32,
) {
    let idx = image as usize;

    if let Some(other) = conflicting_owner(records, frame, image) {
        frames[other].swap_image = None;
    }
    if let Some(old) = frames[frame].swap_image {
        let old = old as usize;
        if old != idx && records[old].owner == Some(frame) {
            records[old].owner = None;
        }
    }

    frames[frame].swap_image = Some(image);
    records[idx].owner = Some(frame);
}

/// Both tables agree and no image has two owners.
pub fn ownership_consistent(frames: &[FrameDrawRecord], records: &[SwapchainRecord]) -> bool {
    let frames_agree = frames.iter().enumerate().all(|(f, rec)| match rec.swap_image {
        Some(i) => records.get(i as usize).and_then(|r| r.owner) == Some(f),
        None => true,
    });
    let records_agree = records.iter().enumerate().all(|(i, rec)| match rec.owner {
        Some(f) => frames.get(f).and_then(|fr| fr.swap_image) == Some(i as u32),
        None => true,
    });
    frames_agree && records_agree
}
