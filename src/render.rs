//! Result images: overlays on the camera frame and its object-plane view.
//!
//! - [`bevel_image`]: frame in RGB with the bevel (red), its vertices
//!   (green), the D markers (purple), the profile (blue) and its anchors
//!   (yellow).
//! - [`ObjectPlaneView`]: a square window of [`OBJECT_PLANE_SIDE_MM`]
//!   centred on the optical axis, resampled through the transform at the
//!   image pixel pitch; the same overlays can be drawn in it.
//! - [`trace_lines`]: detected chart lines on a blank image.
use crate::hough::Line;
use crate::image::{ImageF32, ImageU8, ImageView};
use crate::profile::{PixelPoint, Profile};
use crate::transform::ScheimpflugTransform;
use nalgebra::Vector2;

/// Side of the object-plane window, mm.
pub const OBJECT_PLANE_SIDE_MM: f64 = 5.5;

pub type Rgb = [u8; 3];

pub const RED: Rgb = [255, 0, 0];
pub const GREEN: Rgb = [0, 255, 0];
pub const BLUE: Rgb = [0, 0, 255];
pub const YELLOW: Rgb = [255, 255, 0];
pub const PURPLE: Rgb = [255, 0, 255];

/// Three-channel copy of `image`; gray frames are replicated.
pub fn to_rgb(image: &ImageU8) -> ImageU8 {
    if image.channels() == 3 {
        return image.clone();
    }
    let mut out = ImageU8::new(image.width(), image.height(), 3);
    for y in 0..image.height() {
        for x in 0..image.width() {
            let v = image.get(x, y);
            for c in 0..3 {
                out.set_c(x, y, c, v);
            }
        }
    }
    out
}

/// Paint a `size`×`size` square (odd, at least 1) around each point of an
/// RGB image; pixels off the image are skipped.
pub fn draw_points(image: &mut ImageU8, points: &[PixelPoint], color: Rgb, size: usize) {
    let half = (size.max(1) / 2) as i32;
    let (w, h) = (image.width() as i32, image.height() as i32);
    let channels = image.channels().min(3);
    for p in points {
        for dy in -half..=half {
            for dx in -half..=half {
                let (x, y) = (p.x + dx, p.y + dy);
                if x < 0 || y < 0 || x >= w || y >= h {
                    continue;
                }
                for (c, &v) in color.iter().enumerate().take(channels) {
                    image.set_c(x as usize, y as usize, c, v);
                }
            }
        }
    }
}

fn draw_overlays(image: &mut ImageU8, bevel: Option<&Profile>, profile: Option<&Profile>, map: impl Fn(&[PixelPoint]) -> Vec<PixelPoint>) {
    if let Some(bevel) = bevel {
        draw_points(image, &map(&bevel.points), RED, 1);
        draw_points(image, &map(&bevel.model_points), GREEN, 3);
        draw_points(image, &map(&bevel.distance_points), PURPLE, 5);
    }
    if let Some(profile) = profile {
        draw_points(image, &map(&profile.points), BLUE, 1);
        draw_points(image, &map(&profile.anchors), YELLOW, 3);
    }
}

/// The frame with the fit drawn over it.
pub fn bevel_image(input: &ImageU8, bevel: Option<&Profile>, profile: Option<&Profile>) -> ImageU8 {
    let mut out = to_rgb(input);
    draw_overlays(&mut out, bevel, profile, |p| p.to_vec());
    out
}

/// Object-plane window seen through a transform.
#[derive(Clone, Debug)]
pub struct ObjectPlaneView<'a> {
    transform: &'a ScheimpflugTransform,
    side: usize,
}

impl<'a> ObjectPlaneView<'a> {
    pub fn new(transform: &'a ScheimpflugTransform) -> Self {
        let side = transform.mm_to_pixel(OBJECT_PLANE_SIDE_MM).round().max(1.0) as usize;
        Self { transform, side }
    }

    /// Width and height of the window, pixels.
    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    /// Window pixel of an image point.
    pub fn to_view(&self, p: PixelPoint) -> PixelPoint {
        let obj = self
            .transform
            .image_to_object(Vector2::new(p.x as f64, p.y as f64));
        let half = (self.side / 2) as i32;
        PixelPoint::new(
            (self.transform.mm_to_pixel(obj.x) + 0.5).floor() as i32 + half,
            (self.transform.mm_to_pixel(obj.y) + 0.5).floor() as i32 + half,
        )
    }

    pub fn map_points(&self, points: &[PixelPoint]) -> Vec<PixelPoint> {
        points.iter().map(|&p| self.to_view(p)).collect()
    }

    /// Resample `input` on the object plane; pixels whose source falls off
    /// the frame stay black.
    pub fn image(&self, input: &ImageU8) -> ImageU8 {
        let channels = input.channels();
        let mut out = ImageU8::new(self.side, self.side, channels);
        let half = (self.side / 2) as f64;
        for y in 0..self.side {
            for x in 0..self.side {
                let obj = Vector2::new(
                    self.transform.pixel_to_mm(x as f64 - half),
                    self.transform.pixel_to_mm(y as f64 - half),
                );
                let img = self.transform.object_to_image(obj, false);
                let (sx, sy) = ((img.x + 0.5).floor(), (img.y + 0.5).floor());
                if sx < 0.0 || sy < 0.0 || sx >= input.width() as f64 || sy >= input.height() as f64 {
                    continue;
                }
                for c in 0..channels {
                    out.set_c(x, y, c, input.get_c(sx as usize, sy as usize, c));
                }
            }
        }
        out
    }

    /// Object-plane image of the frame with the fit drawn over it.
    pub fn bevel_image(&self, input: &ImageU8, bevel: Option<&Profile>, profile: Option<&Profile>) -> ImageU8 {
        let mut out = self.image(&to_rgb(input));
        draw_overlays(&mut out, bevel, profile, |p| self.map_points(p));
        out
    }
}

/// Draw `lines` at 1.0 on `image`, stepping along the longer axis.
pub fn trace_lines(image: &mut ImageF32, lines: &[Line]) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    for line in lines {
        let (dx, dy) = ((line.p2.x - line.p1.x) as f64, (line.p2.y - line.p1.y) as f64);
        let steps = dx.abs().max(dy.abs()).max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = (line.p1.x as f64 + t * dx).round() as i64;
            let y = (line.p1.y as f64 + t * dy).round() as i64;
            if (0..w).contains(&x) && (0..h).contains(&y) {
                image.set(x as usize, y as usize, 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformParams;

    #[test]
    fn gray_frames_become_rgb_and_points_are_clipped() {
        let mut gray = ImageU8::new_gray(8, 8);
        gray.set(2, 2, 40);
        let mut rgb = to_rgb(&gray);
        assert_eq!(rgb.channels(), 3);
        assert_eq!(rgb.get_c(2, 2, 1), 40);

        draw_points(&mut rgb, &[PixelPoint::new(0, 0), PixelPoint::new(20, 20)], YELLOW, 3);
        assert_eq!([rgb.get_c(1, 1, 0), rgb.get_c(1, 1, 1), rgb.get_c(1, 1, 2)], YELLOW);
        assert_eq!(rgb.get_c(2, 2, 0), 40);
    }

    #[test]
    fn overlays_use_their_colours() {
        let input = ImageU8::new_gray(50, 50);
        let mut bevel = Profile::from_points(vec![PixelPoint::new(10, 10)]);
        bevel.model_points = vec![PixelPoint::new(30, 30)];
        let out = bevel_image(&input, Some(&bevel), None);
        assert_eq!(out.get_c(10, 10, 0), 255);
        assert_eq!(out.get_c(10, 10, 1), 0);
        assert_eq!(out.get_c(31, 31, 1), 255);
    }

    #[test]
    fn object_plane_view_centres_the_axis() {
        let t = ScheimpflugTransform::new(&TransformParams::default());
        let view = ObjectPlaneView::new(&t);
        let expected = t.mm_to_pixel(OBJECT_PLANE_SIDE_MM).round() as usize;
        assert_eq!(view.side(), expected);

        // the image of the object origin lands in the middle of the window
        let centre = t.object_to_image(Vector2::zeros(), true);
        let p = view.to_view(PixelPoint::new(centre.x as i32, centre.y as i32));
        let half = (view.side() / 2) as i32;
        assert!((p.x - half).abs() <= 1 && (p.y - half).abs() <= 1, "{p:?}");

        let mut input = ImageU8::new_gray(560, 560);
        input.fill(200);
        let img = view.image(&input);
        assert_eq!(img.get(view.side() / 2, view.side() / 2), 200);
    }

    #[test]
    fn traced_lines_cover_their_endpoints() {
        let mut img = ImageF32::new_gray(20, 20);
        trace_lines(&mut img, &[Line::new(0, 5, 19, 5), Line::new(3, 19, 3, 0)]);
        assert_eq!(img.get(0, 5), 1.0);
        assert_eq!(img.get(19, 5), 1.0);
        assert_eq!(img.get(3, 0), 1.0);
        assert_eq!(img.samples().filter(|&v| v > 0.0).count(), 20 + 20 - 1);
    }
}
