use bevel_calib::image::ImageU8;

/// Three-channel frame where every channel holds `f(x, y)`.
pub fn rgb_frame(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> ImageU8 {
    let mut img = ImageU8::new(width, height, 3);
    for y in 0..height {
        for x in 0..width {
            let v = f(x, y);
            for c in 0..3 {
                img.set_c(x, y, c, v);
            }
        }
    }
    img
}

/// Bright vertical ridge of Gaussian cross-section centred on `x0`, on a
/// dark background.
pub fn ridge_frame(width: usize, height: usize, x0: f64, sigma: f64) -> ImageU8 {
    rgb_frame(width, height, |x, _| {
        let d = (x as f64 - x0) / sigma;
        (10.0 + 200.0 * (-0.5 * d * d).exp()).round() as u8
    })
}
