//! I/O helpers for image buffers and JSON, plus the debug image sink.
//!
//! - `load_image`: read a PNG/JPEG/etc. into an owned `ImageU8` (gray or RGB).
//! - `save_u8`: write a 1- or 3-channel `ImageU8` to disk.
//! - `save_grayscale_f32`: write an `ImageF32` in [0, 1] as an 8-bit PNG.
//! - `write_json_file`: pretty-print a serializable value to disk.
//! - `ImageSink`: best-effort storage for debug overlays.
use super::{ImageF32, ImageU8, ImageView};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use log::warn;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Load an image from disk, keeping gray images single-channel and
/// converting everything else to interleaved RGB.
pub fn load_image(path: &Path) -> Result<ImageU8, String> {
    let img = image::open(path).map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    let (channels, raw) = match img {
        DynamicImage::ImageLuma8(gray) => (1, gray.into_raw()),
        other => (3, other.into_rgb8().into_raw()),
    };
    ImageU8::from_raw(w, h, channels, w * channels, &raw)
        .ok_or_else(|| format!("Failed to build image buffer for {}", path.display()))
}

/// Save a 1- or 3-channel 8-bit buffer.
pub fn save_u8(image: &ImageU8, path: &Path) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let (w, h) = (image.width() as u32, image.height() as u32);
    let packed: Vec<u8> = image.rows().flat_map(|r| r.iter().copied()).collect();
    let dynamic = match image.channels() {
        1 => GrayImage::from_raw(w, h, packed).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, packed).map(DynamicImage::ImageRgb8),
        n => return Err(format!("Unsupported channel count {n} for {}", path.display())),
    }
    .ok_or_else(|| "Failed to create image buffer".to_string())?;
    dynamic
        .save(path)
        .map_err(|e| format!("Failed to save {}: {e}", path.display()))
}

/// Save a float image to a grayscale PNG, clamping values in [0, 255].
pub fn save_grayscale_f32(image: &ImageF32, path: &Path) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let mut out = GrayImage::new(image.width() as u32, image.height() as u32);
    for (y, row) in image.rows().enumerate() {
        for (x, &px) in row.iter().enumerate() {
            let v = (px * 255.0).clamp(0.0, 255.0);
            out.put_pixel(x as u32, y as u32, Luma([v as u8]));
        }
    }
    out.save(path)
        .map_err(|e| format!("Failed to save {}: {e}", path.display()))
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}

/// Destination for optional debug images and dumps.
///
/// Storage is best-effort: implementations log failures and never propagate
/// them into the processing result.
pub trait ImageSink {
    fn store_u8(&self, name: &str, image: &ImageU8);
    fn store_f32(&self, name: &str, image: &ImageF32);
    fn store_json(&self, name: &str, value: &serde_json::Value);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ImageSink for NullSink {
    fn store_u8(&self, _name: &str, _image: &ImageU8) {}
    fn store_f32(&self, _name: &str, _image: &ImageF32) {}
    fn store_json(&self, _name: &str, _value: &serde_json::Value) {}
}

/// Writes PNG / JSON files into a folder.
#[derive(Clone, Debug)]
pub struct FolderSink {
    folder: PathBuf,
}

impl FolderSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn path_for(&self, name: &str, ext: &str) -> PathBuf {
        self.folder.join(format!("{name}.{ext}"))
    }
}

impl ImageSink for FolderSink {
    fn store_u8(&self, name: &str, image: &ImageU8) {
        if let Err(err) = save_u8(image, &self.path_for(name, "png")) {
            warn!("debug image '{name}' not stored: {err}");
        }
    }

    fn store_f32(&self, name: &str, image: &ImageF32) {
        if let Err(err) = save_grayscale_f32(image, &self.path_for(name, "png")) {
            warn!("debug image '{name}' not stored: {err}");
        }
    }

    fn store_json(&self, name: &str, value: &serde_json::Value) {
        if let Err(err) = write_json_file(&self.path_for(name, "json"), value) {
            warn!("debug dump '{name}' not stored: {err}");
        }
    }
}
