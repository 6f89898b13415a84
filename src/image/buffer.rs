//! Owned, row-padded interleaved image buffer generic over the sample type.
//!
//! The byte stride of a row is `width * channels * size_of::<T>()` rounded up
//! to a multiple of 4, so an 8-bit 561-pixel row occupies 564 bytes. All
//! access goes through row slices of the valid region.
use super::traits::{ImageView, ImageViewMut};
use std::mem::size_of;

/// Sample types an [`ImageBuffer`] can hold.
pub trait Sample: Copy + Default + PartialOrd + Send + Sync + 'static {}

impl Sample for u8 {}
impl Sample for f32 {}

pub type ImageU8 = ImageBuffer<u8>;
pub type ImageF32 = ImageBuffer<f32>;

#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuffer<T> {
    width: usize,
    height: usize,
    channels: usize,
    /// Samples (not bytes) between consecutive rows
    stride: usize,
    data: Vec<T>,
}

/// Row stride in samples for the given geometry, padded to a 4-byte boundary.
pub fn padded_stride<T>(width: usize, channels: usize) -> usize {
    let sample = size_of::<T>().max(1);
    let bytes = width * channels * sample;
    let padded = bytes.div_ceil(4) * 4;
    padded / sample
}

impl<T: Sample> ImageBuffer<T> {
    /// Zero-filled buffer of `width x height x channels`.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        let stride = padded_stride::<T>(width, channels);
        Self {
            width,
            height,
            channels,
            stride,
            data: vec![T::default(); stride * height],
        }
    }

    /// Single-channel zero-filled buffer.
    pub fn new_gray(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }

    /// Copy foreign samples laid out with `src_stride` samples per row.
    ///
    /// Returns `None` when `src` is too short for the declared geometry.
    pub fn from_raw(
        width: usize,
        height: usize,
        channels: usize,
        src_stride: usize,
        src: &[T],
    ) -> Option<Self> {
        let row_len = width * channels;
        if src_stride < row_len {
            return None;
        }
        if height > 0 && src.len() < (height - 1) * src_stride + row_len {
            return None;
        }
        let mut out = Self::new(width, height, channels);
        for y in 0..height {
            let start = y * src_stride;
            out.row_mut(y).copy_from_slice(&src[start..start + row_len]);
        }
        Some(out)
    }

    /// Build a single-channel image by evaluating `f(x, y)` per pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut out = Self::new_gray(width, height);
        for y in 0..height {
            for (x, v) in out.row_mut(y).iter_mut().enumerate() {
                *v = f(x, y);
            }
        }
        out
    }

    /// Bytes between consecutive rows; always a multiple of 4.
    #[inline]
    pub fn stride_bytes(&self) -> usize {
        self.stride * size_of::<T>()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    fn idx(&self, x: usize, y: usize, c: usize) -> usize {
        y * self.stride + x * self.channels + c
    }

    /// Sample at (x, y) of channel 0.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.idx(x, y, 0)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: T) {
        let i = self.idx(x, y, 0);
        self.data[i] = v;
    }

    /// Sample at (x, y) of channel `c`.
    #[inline]
    pub fn get_c(&self, x: usize, y: usize, c: usize) -> T {
        self.data[self.idx(x, y, c)]
    }

    #[inline]
    pub fn set_c(&mut self, x: usize, y: usize, c: usize, v: T) {
        let i = self.idx(x, y, c);
        self.data[i] = v;
    }

    /// Sample at signed coordinates, `None` outside the image.
    #[inline]
    pub fn try_get(&self, x: i64, y: i64) -> Option<T> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.get(x as usize, y as usize))
    }

    pub fn fill(&mut self, v: T) {
        for y in 0..self.height {
            self.row_mut(y).fill(v);
        }
    }

    /// Iterate over every valid sample in row-major order.
    pub fn samples(&self) -> impl Iterator<Item = T> + '_ {
        self.rows().flat_map(|row| row.iter().copied())
    }

    /// Apply `f` to every valid sample in place.
    pub fn apply(&mut self, mut f: impl FnMut(T) -> T) {
        for y in 0..self.height {
            for v in self.row_mut(y) {
                *v = f(*v);
            }
        }
    }

    /// Convert to another sample type with the same geometry.
    pub fn map<U: Sample>(&self, mut f: impl FnMut(T) -> U) -> ImageBuffer<U> {
        let mut out = ImageBuffer::<U>::new(self.width, self.height, self.channels);
        for y in 0..self.height {
            for (dst, &src) in out.row_mut(y).iter_mut().zip(self.row(y)) {
                *dst = f(src);
            }
        }
        out
    }

    /// Copy the valid region of `other`, which may use a different stride.
    ///
    /// Returns false if the geometries differ.
    pub fn copy_from(&mut self, other: &ImageBuffer<T>) -> bool {
        if self.width != other.width || self.height != other.height || self.channels != other.channels {
            return false;
        }
        for y in 0..self.height {
            self.row_mut(y).copy_from_slice(other.row(y));
        }
        true
    }
}

impl<T: Sample> ImageView for ImageBuffer<T> {
    type Pixel = T;

    #[inline]
    fn width(&self) -> usize {
        self.width
    }
    #[inline]
    fn height(&self) -> usize {
        self.height
    }
    #[inline]
    fn stride(&self) -> usize {
        self.stride
    }
    #[inline]
    fn channels(&self) -> usize {
        self.channels
    }
    #[inline]
    fn row(&self, y: usize) -> &[T] {
        let start = y * self.stride;
        &self.data[start..start + self.width * self.channels]
    }
    #[inline]
    fn as_slice(&self) -> Option<&[T]> {
        let len = self.width * self.channels * self.height;
        self.is_contiguous().then_some(&self.data[..len])
    }
}

impl<T: Sample> ImageViewMut for ImageBuffer<T> {
    #[inline]
    fn row_mut(&mut self, y: usize) -> &mut [T] {
        let start = y * self.stride;
        let end = start + self.width * self.channels;
        &mut self.data[start..end]
    }
}
