//! Image preprocessing: from a raw camera frame to a cleaned edge profile.
//!
//! Stages:
//! - input validation against the configured geometry,
//! - channel selection, optional median blur (radius 4), u8 -> f32,
//! - optional box low-pass (radius 5), Sobel magnitude,
//! - row-wise [`threshold`] extraction,
//! - two density-filter passes and one smoothing pass.
//!
//! Lens fitting smooths with the distance-weighted [`filter_profile`], which
//! never creates rows; the calibration paths use the flat sliding average.
pub mod cleanup;
pub mod filters;
pub mod threshold;

pub use cleanup::{filter_profile, filter_profile_with_interpolation, remove_isolated_points, CleanupParams};
pub use filters::Roi;
pub use threshold::{threshold, ThresholdParams};

use crate::config::Settings;
use crate::error::ReturnCode;
use crate::image::io::ImageSink;
use crate::image::{ImageF32, ImageU8, ImageView};
use crate::profile::Profile;
use log::{debug, warn};

const MEDIAN_RADIUS: usize = 4;
const LOW_PASS_RADIUS: usize = 5;

/// Smoothing applied after the density filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileSmoothing {
    /// Distance-weighted, drops points on rows absent from the input
    Weighted,
    /// Flat average over the index window
    Interpolated,
}

#[derive(Clone, Debug)]
pub struct PreprocessOutput {
    /// Cleaned profile handed to the models
    pub profile: Profile,
    /// Profile as extracted by the thresholding stage
    pub raw_profile: Profile,
    /// Low-pass float image the profile was located on
    pub low_pass: ImageF32,
}

/// Check that `image` matches the configured size and channel count.
pub fn validate_input<'a>(image: Option<&'a ImageU8>, settings: &Settings) -> Result<&'a ImageU8, ReturnCode> {
    let image = image.ok_or(ReturnCode::PreprocessFailedImageNotAvailable)?;
    let expected = &settings.image;
    if image.channels() != expected.n_channels {
        warn!(
            "preprocess: {} channels, expected {}",
            image.channels(),
            expected.n_channels
        );
        return Err(ReturnCode::PreprocessFailedWrongImageChannel);
    }
    if image.width() != expected.width || image.height() != expected.height {
        warn!(
            "preprocess: image {}x{}, expected {}x{}",
            image.width(),
            image.height(),
            expected.width,
            expected.height
        );
        return Err(ReturnCode::PreprocessFailedWrongImageSize);
    }
    Ok(image)
}

fn mark_profile(base: &ImageF32, profile: &Profile) -> ImageF32 {
    let mut out = base.clone();
    for p in profile.iter() {
        if p.x >= 0 && p.y >= 0 && (p.x as usize) < out.width() && (p.y as usize) < out.height() {
            out.set(p.x as usize, p.y as usize, 1.0);
        }
    }
    out
}

/// Run the full preprocessing chain on a camera frame.
///
/// Debug images (`{label}_profile`, `{label}_profileCleaned`,
/// `{label}_medianFilter`) and JSON dumps of both profiles go to `sink` when
/// `test.debug` is set and `label` is not empty.
pub fn pre_process(
    image: Option<&ImageU8>,
    settings: &Settings,
    smoothing: ProfileSmoothing,
    label: &str,
    sink: &dyn ImageSink,
) -> Result<PreprocessOutput, ReturnCode> {
    let image = validate_input(image, settings)?;
    debug!("preprocess: {label} ({smoothing:?})");

    let channel = filters::get_channel(image, settings.image.selected_channel);
    let median = settings
        .test
        .median_blur_filter
        .then(|| filters::median(&*channel, MEDIAN_RADIUS));
    let source = median.as_ref().unwrap_or(&*channel);
    let float = filters::to_f32(source);
    let low_pass = if settings.test.low_pass_filter {
        filters::low_pass(&float, LOW_PASS_RADIUS)
    } else {
        float
    };
    let sobel = filters::sobel(&low_pass);

    let raw_profile = threshold(&sobel, &low_pass, &settings.thresholding)?;

    let cleanup = &settings.profile_cleanup;
    let mut profile = raw_profile.clone();
    for _ in 0..2 {
        profile = remove_isolated_points(
            &profile,
            cleanup.distance_threshold,
            cleanup.window_size,
            cleanup.counter_threshold,
        );
    }
    profile = match smoothing {
        ProfileSmoothing::Weighted => {
            filter_profile(&profile, cleanup.filtering_half_window_size, settings.image.height)
        }
        ProfileSmoothing::Interpolated => {
            filter_profile_with_interpolation(&profile, cleanup.filtering_half_window_size)
        }
    };
    debug!(
        "preprocess: {} raw points, {} after cleanup",
        raw_profile.len(),
        profile.len()
    );
    if profile.is_empty() {
        return Err(ReturnCode::PreprocessFailedProfileDetection);
    }

    if settings.test.debug && !label.is_empty() {
        sink.store_f32(&format!("{label}_profile"), &mark_profile(&low_pass, &raw_profile));
        sink.store_f32(&format!("{label}_profileCleaned"), &mark_profile(&low_pass, &profile));
        if let Some(median) = &median {
            sink.store_u8(&format!("{label}_medianFilter"), median);
        }
        if let Ok(value) = serde_json::to_value(&raw_profile.points) {
            sink.store_json(&format!("profile_{label}"), &value);
        }
        if let Ok(value) = serde_json::to_value(&profile.points) {
            sink.store_json(&format!("profileCleaned_{label}"), &value);
        }
    }

    Ok(PreprocessOutput {
        profile,
        raw_profile,
        low_pass,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::io::NullSink;

    fn settings(w: usize, h: usize, channels: usize) -> Settings {
        let mut settings = Settings::default();
        settings.image.width = w;
        settings.image.height = h;
        settings.image.n_channels = channels;
        settings.image.selected_channel = 0;
        settings
    }

    #[test]
    fn missing_image_is_reported() {
        let s = settings(10, 10, 1);
        let err = pre_process(None, &s, ProfileSmoothing::Weighted, "", &NullSink).unwrap_err();
        assert_eq!(err, ReturnCode::PreprocessFailedImageNotAvailable);
    }

    #[test]
    fn geometry_mismatch_is_reported() {
        let img = ImageU8::new_gray(10, 12);
        let s = settings(10, 10, 1);
        assert_eq!(
            validate_input(Some(&img), &s).unwrap_err(),
            ReturnCode::PreprocessFailedWrongImageSize
        );
        let s = settings(10, 12, 3);
        assert_eq!(
            validate_input(Some(&img), &s).unwrap_err(),
            ReturnCode::PreprocessFailedWrongImageChannel
        );
    }

    #[test]
    fn dark_frame_has_no_profile() {
        let img = ImageU8::new_gray(64, 64);
        let s = settings(64, 64, 1);
        let err = pre_process(Some(&img), &s, ProfileSmoothing::Interpolated, "", &NullSink).unwrap_err();
        assert_eq!(err, ReturnCode::PreprocessFailedProfileDetection);
    }
}
