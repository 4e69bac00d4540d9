// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info, warn};

use crate::device::{GpuDevice, SwapchainDesc};
use crate::error::{FrameError, VkResultExt};

/// Tried in order when none of the caller's preferred formats is available.
pub const SUGGESTED_DEFAULT_FORMATS: [vk::SurfaceFormatKHR; 4] = [
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    NotCreated,
    Created,
    Lost,
    Recreating,
    Destroyed,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainRequest<'a> {
    pub usage: vk::ImageUsageFlags,
    pub present_mode: vk::PresentModeKHR,
    pub min_image_count: u32,
    pub fallback_extent: vk::Extent2D,
    pub preferred_formats: &'a [vk::SurfaceFormatKHR],
}

pub struct SwapchainManager {
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
    present_mode: vk::PresentModeKHR,
    state: SwapchainState,
}

fn same_format(a: &vk::SurfaceFormatKHR, b: &vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

/// Pick the first preferred format the surface supports, then the first
/// suggested default, then whatever the driver lists first.
pub fn select_surface_format(
    supported: &[vk::SurfaceFormatKHR],
    preferred: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, FrameError> {
    let Some(first) = supported.first() else {
        return Err(FrameError::NoSurfaceFormats);
    };

    // A lone UNDEFINED entry means the surface takes any format.
    if supported.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(preferred
            .first()
            .copied()
            .unwrap_or(SUGGESTED_DEFAULT_FORMATS[0]));
    }

    if let Some(f) = preferred
        .iter()
        .find(|p| supported.iter().any(|s| same_format(p, s)))
    {
        return Ok(*f);
    }
    if !preferred.is_empty() {
        debug!("none of the preferred surface formats found, using default");
    }

    Ok(SUGGESTED_DEFAULT_FORMATS
        .iter()
        .find(|d| supported.iter().any(|s| same_format(d, s)))
        .copied()
        .unwrap_or(*first))
}

/// Drop every requested usage bit the surface does not support, warning once per bit.
pub fn filter_image_usage(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested: vk::ImageUsageFlags,
) -> vk::ImageUsageFlags {
    let mut supported = vk::ImageUsageFlags::empty();
    let mut remaining = requested.as_raw();
    while remaining != 0 {
        let bit = remaining & remaining.wrapping_neg();
        let flag = vk::ImageUsageFlags::from_raw(bit);
        if caps.supported_usage_flags.contains(flag) {
            supported |= flag;
        } else {
            warn!(
                "swapchain image usage 0x{:x} ({:?}) is unsupported by the surface, ignored",
                bit, flag
            );
        }
        remaining &= !bit;
    }
    supported
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&desired) {
        desired
    } else {
        debug!("present mode {:?} unavailable, using FIFO", desired);
        vk::PresentModeKHR::FIFO
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Desired count raised to the surface minimum, capped by the maximum (0 == no max).
pub fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let count = desired.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

impl SwapchainManager {
    pub fn new(surface: vk::SurfaceKHR) -> Self {
        Self {
            surface,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            usage: vk::ImageUsageFlags::empty(),
            present_mode: vk::PresentModeKHR::FIFO,
            state: SwapchainState::NotCreated,
        }
    }

    /// Create the swapchain, handing the current one (if any) to the driver as
    /// `old_swapchain` and destroying it once it has been retired.
    pub fn create<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        req: &SwapchainRequest<'_>,
    ) -> Result<(), FrameError> {
        let caps = device
            .surface_capabilities(self.surface)
            .call("get_physical_device_surface_capabilities")?;
        let formats = device
            .surface_formats(self.surface)
            .call("get_physical_device_surface_formats")?;
        let format = select_surface_format(&formats, req.preferred_formats)?;
        let modes = device
            .surface_present_modes(self.surface)
            .call("get_physical_device_surface_present_modes")?;
        let present_mode = choose_present_mode(&modes, req.present_mode);

        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | filter_image_usage(&caps, req.usage);
        let extent = extent_from_caps(&caps, req.fallback_extent);
        let min_image_count = image_count_from_caps(&caps, req.min_image_count);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let old_swapchain = self.handle;
        let desc = SwapchainDesc {
            surface: self.surface,
            min_image_count,
            format,
            extent,
            usage,
            pre_transform,
            present_mode,
            old_swapchain,
        };

        // The old swapchain is retired by this call whether or not it succeeds.
        let created = device.create_swapchain(&desc);
        if old_swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain(old_swapchain);
            self.handle = vk::SwapchainKHR::null();
            self.images.clear();
        }
        let handle = match created {
            Ok(h) => h,
            Err(result) => {
                self.state = SwapchainState::Lost;
                return Err(FrameError::Vk {
                    call: "create_swapchain",
                    result,
                });
            }
        };
        self.handle = handle;
        self.images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(result) => {
                // The handle stays put so the next create retires it.
                self.state = SwapchainState::Lost;
                return Err(FrameError::Vk {
                    call: "get_swapchain_images",
                    result,
                });
            }
        };
        self.format = format;
        self.extent = extent;
        self.usage = usage;
        self.present_mode = present_mode;
        self.state = SwapchainState::Created;

        info!(
            "swapchain ready ({}x{}, format {:?} / {:?}, present {:?}, images {} (min {}))",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            self.images.len(),
            min_image_count
        );
        Ok(())
    }

    pub fn mark_lost(&mut self) {
        if self.state == SwapchainState::Created {
            self.state = SwapchainState::Lost;
        }
    }

    pub fn begin_recreate(&mut self) {
        if self.state != SwapchainState::Destroyed {
            self.state = SwapchainState::Recreating;
        }
    }

    /// Final teardown. Only called once every view and framebuffer on the images is gone.
    pub fn destroy<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        if self.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
        self.state = SwapchainState::Destroyed;
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::SwapchainKHR::null()
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice, Op};

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn request(preferred: &[vk::SurfaceFormatKHR]) -> SwapchainRequest<'_> {
        SwapchainRequest {
            usage: vk::ImageUsageFlags::empty(),
            present_mode: vk::PresentModeKHR::FIFO,
            min_image_count: 2,
            fallback_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            preferred_formats: preferred,
        }
    }

    #[test]
    fn preferred_format_wins_in_preference_order() {
        let supported = [fmt(vk::Format::R8G8B8A8_UNORM), fmt(vk::Format::B8G8R8A8_SRGB)];
        let preferred = [fmt(vk::Format::B8G8R8A8_SRGB), fmt(vk::Format::R8G8B8A8_UNORM)];
        let picked = select_surface_format(&supported, &preferred).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_suggested_defaults_then_first_supported() {
        let supported = [fmt(vk::Format::A2B10G10R10_UNORM_PACK32), fmt(vk::Format::R8G8B8A8_UNORM)];
        let preferred = [fmt(vk::Format::R16G16B16A16_SFLOAT)];
        let picked = select_surface_format(&supported, &preferred).unwrap();
        assert_eq!(picked.format, vk::Format::R8G8B8A8_UNORM);

        let supported = [fmt(vk::Format::A2B10G10R10_UNORM_PACK32)];
        let picked = select_surface_format(&supported, &[]).unwrap();
        assert_eq!(picked.format, vk::Format::A2B10G10R10_UNORM_PACK32);
    }

    #[test]
    fn colour_space_must_match_too() {
        let supported = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        let picked = select_surface_format(&supported, &[fmt(vk::Format::B8G8R8A8_UNORM)]).unwrap();
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
    }

    #[test]
    fn no_supported_formats_is_an_error() {
        let err = select_surface_format(&[], &[fmt(vk::Format::B8G8R8A8_UNORM)]).unwrap_err();
        assert!(matches!(err, FrameError::NoSurfaceFormats));
    }

    #[test]
    fn unsupported_usage_bits_are_dropped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
            ..Default::default()
        };
        let filtered = filter_image_usage(
            &caps,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE,
        );
        assert_eq!(filtered, vk::ImageUsageFlags::TRANSFER_DST);
    }

    #[test]
    fn image_count_respects_surface_limits() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count_from_caps(&caps, 2), 3);
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(image_count_from_caps(&caps, 4), 2);
    }

    #[test]
    fn free_size_surface_clamps_the_fallback_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let e = extent_from_caps(
            &caps,
            vk::Extent2D {
                width: 4096,
                height: 8,
            },
        );
        assert_eq!((e.width, e.height), (1024, 16));
    }

    #[test]
    fn create_then_recreate_passes_and_retires_the_old_handle() {
        let dev = MockDevice::new();
        let mut sc = SwapchainManager::new(dev.surface());
        assert_eq!(sc.state(), SwapchainState::NotCreated);

        sc.create(&dev, &request(&[])).unwrap();
        assert_eq!(sc.state(), SwapchainState::Created);
        let first = sc.handle();
        assert_eq!(sc.image_count(), 3);
        assert!(sc.usage().contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        sc.mark_lost();
        assert_eq!(sc.state(), SwapchainState::Lost);
        sc.begin_recreate();
        sc.create(&dev, &request(&[])).unwrap();
        assert_ne!(sc.handle(), first);
        assert!(dev
            .calls()
            .contains(&Call::CreateSwapchain { old: first }));
        assert!(dev.calls().contains(&Call::DestroySwapchain(first)));
        assert_eq!(dev.live_swapchains(), 1);

        sc.destroy(&dev);
        assert_eq!(sc.state(), SwapchainState::Destroyed);
        assert_eq!(dev.live_swapchains(), 0);
    }

    #[test]
    fn failed_image_query_leaves_the_swapchain_lost() {
        let dev = MockDevice::new();
        let mut sc = SwapchainManager::new(dev.surface());
        dev.fail_next(Op::SwapchainImages, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = sc.create(&dev, &request(&[])).unwrap_err();
        assert!(matches!(err, FrameError::Vk { call: "get_swapchain_images", .. }));
        assert_eq!(sc.state(), SwapchainState::Lost);
        let orphan = sc.handle();
        assert_ne!(orphan, vk::SwapchainKHR::null());

        sc.begin_recreate();
        sc.create(&dev, &request(&[])).unwrap();
        assert_eq!(sc.state(), SwapchainState::Created);
        assert!(dev.calls().contains(&Call::CreateSwapchain { old: orphan }));
        assert_eq!(dev.live_swapchains(), 1);
    }

    #[test]
    fn create_fails_hard_without_surface_formats() {
        let dev = MockDevice::new();
        dev.set_surface_formats(Vec::new());
        let mut sc = SwapchainManager::new(dev.surface());
        let err = sc.create(&dev, &request(&[])).unwrap_err();
        assert!(matches!(err, FrameError::NoSurfaceFormats));
        assert!(!sc.is_valid());
    }
}
