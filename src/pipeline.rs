//! Request orchestration: the [`Htt`] facade over preprocessing, the chart
//! detector and the optimization engine.
//!
//! A request walks Preprocessing -> ModelInit -> Optimizing -> Finalizing and
//! ends in a result record carrying `valid` and its [`ReturnCode`]; the code
//! is also left in the reporter for callers that poll it. Every request
//! re-initializes the transform for its stylus orientation: calibration
//! requests start from the nominal parameters, everything else from the
//! calibrated ones.
//!
//! Retries:
//! - single-image accurate calibration repeats preprocess + fit + calibrate
//!   (one swarm run each) up to
//!   `scheimpflug_transformation_calibration.maxRetries` times and stops at
//!   once on a frame of the wrong size or channel count,
//! - multi-image calibration processes every image once and retries the
//!   swarm on the images that produced a fit,
//! - model fits retry internally (see [`engine::optimize_model`]).
pub mod results;

pub use results::{
    AccurateCalibrationResult, CalibrationGridResult, CalibrationImage, LensFittingResult, ProfileDetectionResult,
};
pub use crate::retry::retry;

use crate::config::{Calibration, FrameReference, Settings};
use crate::engine::{self, FitOutput, FrameSample, ProcessType};
use crate::error::{ReturnCode, ReturnCodeReporter};
use crate::hough::detect_grid;
use crate::image::io::{FolderSink, ImageSink, NullSink};
use crate::image::{ImageF32, ImageU8, ImageView};
use crate::model::{BevelModel, Measures, MiniBevel, ModelType};
use crate::preprocess::{pre_process, ProfileSmoothing};
use crate::profile::{PixelPoint, Profile};
use crate::render::{self, ObjectPlaneView};
use crate::transform::ScheimpflugTransform;
use log::{debug, info, warn};
use nalgebra::Vector2;
use std::collections::BTreeMap;

/// Warning limits of the chart square errors, µm.
const SIDE_ERROR_H_UM: f64 = 16.0;
const SIDE_ERROR_V_UM: f64 = 10.0;
const DIAGONAL_ERROR_UM: f64 = 18.86796;

#[derive(Clone, Copy, Debug)]
struct Request<'a> {
    image: &'a ImageU8,
    r: f64,
    h: f64,
    process: ProcessType,
    model_type: ModelType,
    label: &'a str,
    optimize: bool,
}

struct Fitted {
    output: FitOutput,
    model: Box<dyn BevelModel>,
    bevel_image: ImageU8,
    obj_bevel_image: ImageU8,
}

struct Processed {
    profile: Profile,
    /// `None` when optimization was skipped
    fit: Option<Fitted>,
}

/// MiniBevel frame sample from a fitted model's image vertices.
fn frame_sample(model: &dyn BevelModel, angle: f64) -> Option<FrameSample> {
    let mut mini = MiniBevel::new(model.core().clone(), angle);
    mini.set_from_img_points(model.core().image_points())?;
    Some(FrameSample::from_model(mini))
}

/// Stylus H from the central horizontal chart line: the line should be
/// level on the object plane once the transform knows the true H.
pub fn estimate_h(transform: &ScheimpflugTransform, intersections: &[Vector2<f64>], h: f64) -> Option<f64> {
    let n_lines = intersections.len().checked_sub(1)? / 2;
    let half = n_lines / 2;
    if half == 0 {
        return None;
    }
    let p1 = (half + (half - 1) / 2) * 2;
    let (a, b) = (intersections.get(p1)?, intersections.get(p1 + 1)?);
    let (a, b) = (transform.image_to_object(*a), transform.image_to_object(*b));
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    if dx.abs() <= f64::EPSILON {
        return None;
    }
    let est = -(h + (dy / dx).atan().to_degrees());
    debug!("estimate H: {est:.4} (dx {dx:.4} dy {dy:.4})");
    Some(est)
}

/// Instrument facade: owns the configuration, the transform, the debug
/// sink and the return-code reporter.
pub struct Htt {
    settings: Settings,
    calibration: Calibration,
    transform: ScheimpflugTransform,
    reporter: ReturnCodeReporter,
    sink: Box<dyn ImageSink>,
}

impl Htt {
    /// Debug images go to `test.outputFolder` when `test.storeImages` is set.
    pub fn new(settings: Settings, calibration: Calibration) -> Self {
        let sink: Box<dyn ImageSink> = if settings.test.store_images {
            Box::new(FolderSink::new(settings.test.output_folder.clone()))
        } else {
            Box::new(NullSink)
        };
        Self::with_sink(settings, calibration, sink)
    }

    pub fn with_sink(settings: Settings, calibration: Calibration, sink: Box<dyn ImageSink>) -> Self {
        let transform = ScheimpflugTransform::new(&calibration.scheimpflug_transformation);
        Self {
            settings,
            calibration,
            transform,
            reporter: ReturnCodeReporter::new(),
            sink,
        }
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Calibration document, including parameters stored by the last
    /// successful calibration.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Calibration document as pretty JSON.
    pub fn calibration_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(&self.calibration).map_err(|e| format!("Failed to serialize calibration: {e}"))
    }

    #[inline]
    pub fn transform(&self) -> &ScheimpflugTransform {
        &self.transform
    }

    /// Pending return code; reading it resets it to `Uninitialized`.
    pub fn return_code(&mut self) -> ReturnCode {
        self.reporter.take()
    }

    /// Log and consume the pending return code.
    pub fn print_return_code(&mut self) -> i32 {
        self.reporter.print()
    }

    /// Load the calibrated (or, in calibration mode, the nominal) transform
    /// and apply the stylus orientation.
    pub fn init(&mut self, r: f64, h: f64, calibration_mode: bool) {
        let params = if calibration_mode {
            debug!("htt: init calibration mode, deltaN {r} H {h}");
            &self.calibration.nominal_scheimpflug_transformation
        } else {
            debug!("htt: init fitting mode, deltaN {r} H {h}");
            &self.calibration.scheimpflug_transformation
        };
        self.transform.init(params);
        self.transform.set_stylus_orientation(r, h);
    }

    fn check_orientation(&self, r: f64, h: f64) {
        if r == 0.0 || h == 0.0 {
            info!("htt: check stylus orientation, deltaN {r:.1} H {h:.1}");
        }
        let limits = &self.calibration.htt;
        if !limits.delta_n.contains(r) {
            warn!(
                "htt: deltaN {r} out of [{}, {}]",
                limits.delta_n.min, limits.delta_n.max
            );
        }
        if !limits.h.contains(h) {
            warn!("htt: H {h} out of [{}, {}]", limits.h.min, limits.h.max);
        }
    }

    fn process(&mut self, req: &Request<'_>) -> Result<Processed, ReturnCode> {
        self.check_orientation(req.r, req.h);
        self.init(req.r, req.h, req.process == ProcessType::Calibration);

        let smoothing = match req.process {
            ProcessType::LensFitting => ProfileSmoothing::Weighted,
            ProcessType::Calibration | ProcessType::Validation => ProfileSmoothing::Interpolated,
        };
        let pre = self.reporter.record(
            pre_process(Some(req.image), &self.settings, smoothing, req.label, self.sink.as_ref()),
            ReturnCode::PreprocessSuccessful,
        )?;
        let mut profile = pre.profile;

        if !req.optimize {
            return Ok(Processed { profile, fit: None });
        }
        if req.process == ProcessType::LensFitting && !self.settings.optimization.enabled {
            warn!("htt: optimization disabled");
            return Ok(Processed { profile, fit: None });
        }

        let frame_angle = match req.process {
            ProcessType::Validation => self.calibration.current_frame().map(|f| f.angle1),
            ProcessType::LensFitting | ProcessType::Calibration => None,
        };
        let init = engine::init_model(
            &mut profile,
            &self.transform,
            &self.settings,
            req.model_type,
            req.process,
            frame_angle,
        );
        let engine::ModelInit { mut model, input, .. } = match init {
            Ok(init) => init,
            Err(code) => {
                warn!("htt: model was not initialized");
                self.reporter.set(code);
                return Err(code);
            }
        };

        let repetitions = self.settings.test.repetitions.max(1);
        let max_retries = self.settings.optimization.max_retries;
        let mut last = Err(ReturnCode::LensFittingFailedMaxRetriesReached);
        for i in 0..repetitions {
            debug!("htt: optimize model [{}/{repetitions}]", i + 1);
            last = engine::optimize_model(model.as_mut(), &input, max_retries).map(|output| {
                let bevel_image = render::bevel_image(req.image, Some(&output.bevel), Some(&profile));
                let obj_bevel_image =
                    ObjectPlaneView::new(&self.transform).bevel_image(req.image, Some(&output.bevel), Some(&profile));
                if self.settings.test.store_images {
                    self.sink.store_u8(&format!("{}_objplan_{i:03}", req.label), &obj_bevel_image);
                    self.sink.store_u8(&format!("{}_{i:03}", req.label), &bevel_image);
                }
                (output, bevel_image, obj_bevel_image)
            });
        }

        match last {
            Ok((output, bevel_image, obj_bevel_image)) => {
                self.reporter.set(output.code);
                Ok(Processed {
                    profile,
                    fit: Some(Fitted {
                        output,
                        model,
                        bevel_image,
                        obj_bevel_image,
                    }),
                })
            }
            Err(code) => {
                self.reporter.set(code);
                Err(code)
            }
        }
    }

    /// `B` / `M` of the current frame and the measured deviation, µm.
    fn reference_errors(&self, measures: &Measures) -> (Measures, Measures) {
        let (mut real, mut errors) = (Measures::new(), Measures::new());
        if let Some(frame) = self.calibration.current_frame() {
            for (key, value) in [("B", frame.b), ("M", frame.m)] {
                real.insert(key.to_string(), value);
                if let Some(measured) = measures.get(key) {
                    errors.insert(key.to_string(), (value - measured) * 1000.0);
                }
            }
        }
        (real, errors)
    }

    fn bevel_fitting(&mut self, image: &ImageU8, r: f64, h: f64, model_type: ModelType, process: ProcessType) -> LensFittingResult {
        let req = Request {
            image,
            r,
            h,
            process,
            model_type,
            label: "",
            optimize: true,
        };
        let mut result = LensFittingResult {
            model_type: Some(model_type),
            process: Some(process),
            ..LensFittingResult::default()
        };
        let processed = match self.process(&req) {
            Ok(processed) => processed,
            Err(code) => {
                result.code = code;
                return result;
            }
        };

        let view = ObjectPlaneView::new(&self.transform);
        let profile = &processed.profile;
        result.valid = true;
        result.img_profile = profile.points.clone();
        result.img_maxima = profile.anchors.clone();
        result.obj_profile = view.map_points(&profile.points);
        result.obj_maxima = view.map_points(&profile.anchors);

        let Some(fit) = processed.fit else {
            result.code = ReturnCode::PreprocessSuccessful;
            return result;
        };
        let output = &fit.output;
        let bevel = &output.bevel;
        result.code = output.code;
        result.loss = output.loss;
        result.iteration = output.iteration;
        result.img_bevel = bevel.points.clone();
        result.img_model_points = bevel.model_points.clone();
        result.img_distance_points = bevel.distance_points.clone();
        result.obj_bevel = view.map_points(&bevel.points);
        result.obj_model_points = view.map_points(&bevel.model_points);
        result.obj_distance_points = view.map_points(&bevel.distance_points);
        result.obj_plane_image = Some(view.image(image));
        (result.real_measures, result.errors) = self.reference_errors(&output.measures);
        result.measures = output.measures.clone();
        result.bevel_image = Some(fit.bevel_image);
        result.obj_bevel_image = Some(fit.obj_bevel_image);
        result
    }

    /// Fit `model_type` to the frame profile with intersection checking.
    pub fn lens_fitting(&mut self, image: &ImageU8, delta_n: f64, h: f64, model_type: ModelType) -> LensFittingResult {
        self.bevel_fitting(image, delta_n, h, model_type, ProcessType::LensFitting)
    }

    /// Fit against the current calibration frame (its `angle1` replaces the
    /// nominal bevel angle); reports B/M errors against the frame.
    pub fn lens_validation(&mut self, image: &ImageU8, delta_n: f64, h: f64, model_type: ModelType) -> LensFittingResult {
        self.bevel_fitting(image, delta_n, h, model_type, ProcessType::Validation)
    }

    /// Preprocessing only.
    pub fn profile_detection(&mut self, image: &ImageU8, delta_n: f64, h: f64) -> ProfileDetectionResult {
        let req = Request {
            image,
            r: delta_n,
            h,
            process: ProcessType::LensFitting,
            model_type: ModelType::MiniBevel,
            label: "",
            optimize: false,
        };
        match self.process(&req) {
            Ok(processed) => ProfileDetectionResult {
                valid: true,
                code: ReturnCode::PreprocessSuccessful,
                img_profile: processed.profile.points,
            },
            Err(code) => ProfileDetectionResult {
                valid: false,
                code,
                img_profile: Vec::new(),
            },
        }
    }

    fn log_param_check(&self) {
        let check = self.calibration.check_calibrated_params();
        let line: Vec<String> = check.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        info!("htt: calibrated params in nominal range: {}", line.join(" "));
    }

    /// Calibrate the transform on an image of the chart.
    ///
    /// With `save` the calibrated parameters replace the current ones in
    /// the calibration document. The transform is left calibrated at the
    /// grid pose with the estimated H.
    pub fn calibrate_grid(&mut self, image: &ImageU8, save: bool) -> CalibrationGridResult {
        let detection = match self.reporter.record(detect_grid(image, &self.settings), ReturnCode::CalibrationSuccessful) {
            Ok(detection) => detection,
            Err(code) => return CalibrationGridResult::failed(code),
        };

        let test = &self.settings.test;
        if test.store_images {
            let mut overlay = render::to_rgb(image);
            render::draw_points(&mut overlay, &detection.intersections, render::RED, 3);
            self.sink.store_u8("calibrationGrid", &overlay);
            if test.debug {
                self.sink.store_f32("dog", &detection.binary);
                self.sink.store_f32("hough", &detection.accumulator);
                let mut grid = ImageF32::new_gray(image.width(), image.height());
                render::trace_lines(&mut grid, &detection.lines);
                self.sink.store_f32("grid", &grid);
            }
        }

        let points: Vec<Vector2<f64>> = detection
            .intersections
            .iter()
            .map(|p| Vector2::new(p.x as f64, p.y as f64))
            .collect();
        let reference = self.calibration.scheimpflug_transformation_calibration.grid;
        let (r, h) = (reference.delta_n, reference.h);
        self.init(r, h, true);
        let output = engine::calibrate_grid(
            &points,
            &reference,
            &mut self.calibration,
            &self.settings.scheimpflug_transformation_calibration,
            save,
        );
        self.reporter.set(output.code);
        if output.valid {
            self.log_param_check();
        }

        let unsaved = (output.valid && !save).then_some(output.params.as_slice());
        self.init(r, h, false);
        if let Some(v) = unsaved {
            self.transform.init_calibrated(v);
        }
        let estimated_h = estimate_h(&self.transform, &points, h);
        if let Some(est) = estimated_h {
            self.init(r, est, false);
            if let Some(v) = unsaved {
                self.transform.init_calibrated(v);
            }
        }

        let view = ObjectPlaneView::new(&self.transform);
        let obj_grid = view.image(image);
        let obj_intersections = view.map_points(&detection.intersections);
        if self.settings.test.store_images {
            let mut calibrated = render::to_rgb(&obj_grid);
            render::draw_points(&mut calibrated, &obj_intersections, render::RED, 3);
            self.sink.store_u8("gridCalibrated", &calibrated);
        }

        let errors = if output.valid {
            engine::grid_errors(&self.transform, &points)
        } else {
            None
        };
        if let Some(e) = &errors {
            let limits = [SIDE_ERROR_H_UM, SIDE_ERROR_V_UM, SIDE_ERROR_H_UM, SIDE_ERROR_V_UM];
            for (i, (err, limit)) in e.sides.iter().zip(limits).enumerate() {
                if err.abs() > limit {
                    warn!("grid: L{} error {err:.2} um", i + 1);
                }
            }
            for (i, err) in e.diagonals.iter().enumerate() {
                if err.abs() > DIAGONAL_ERROR_UM {
                    warn!("grid: D{} error {err:.2} um", i + 1);
                }
            }
            debug!("grid errors [um]: sides {:?} diagonals {:?}", e.sides, e.diagonals);
        }

        CalibrationGridResult {
            valid: output.valid,
            code: output.code,
            params: output
                .valid
                .then(|| self.calibration.nominal_scheimpflug_transformation.with_calibrated(&output.params)),
            loss: output.loss,
            img_lines: detection.lines,
            img_intersections: detection.intersections,
            obj_intersections,
            obj_grid: Some(obj_grid),
            errors,
            estimated_h,
        }
    }

    fn current_frame(&mut self) -> Option<FrameReference> {
        let frame = self.calibration.current_frame().copied();
        if frame.is_none() {
            warn!(
                "htt: no reference for frame '{}'",
                self.calibration.scheimpflug_transformation_calibration.current
            );
            self.reporter.set(ReturnCode::CalibrationFailedPsoInit);
        }
        frame
    }

    #[inline]
    fn mini_bevel_angle(&self) -> f64 {
        self.settings.pso[ModelType::MiniBevel.index()].angle
    }

    /// Calibrate the transform on one image of the current reference frame.
    ///
    /// Each attempt preprocesses the image, fits a MiniBevel with the
    /// nominal transform and calibrates against the frame; stored on success.
    /// A frame of the wrong size or channel count fails without retrying.
    pub fn accurate_calibration(&mut self, image: &ImageU8, delta_n: f64, h: f64, label: &str) -> AccurateCalibrationResult {
        let Some(frame) = self.current_frame() else {
            return AccurateCalibrationResult::failed(ReturnCode::CalibrationFailedPsoInit);
        };
        let settings = self.settings.scheimpflug_transformation_calibration.clone();
        let angle = self.mini_bevel_angle();
        let req = Request {
            image,
            r: delta_n,
            h,
            process: ProcessType::Calibration,
            model_type: ModelType::MiniBevel,
            label,
            optimize: true,
        };

        let mut last_code = ReturnCode::CalibrationFailedConvergence;
        let mut attempts = 0;
        let outcome = retry(settings.max_retries, |attempt| {
            attempts = attempt;
            let processed = match self.process(&req) {
                Ok(processed) => processed,
                Err(code) if code.is_structural() => {
                    warn!("accurate calibration: {code}, not retrying");
                    return Some(Err(code));
                }
                Err(code) => {
                    debug!("accurate calibration: attempt {attempt}: {code}");
                    last_code = code;
                    return None;
                }
            };
            let sample = frame_sample(processed.fit?.model.as_ref(), angle)?;
            let output = engine::calibrate_frame(&sample, &frame, &mut self.calibration, &settings);
            self.reporter.set(output.code);
            last_code = output.code;
            output.valid.then_some(Ok((output, processed.profile)))
        });

        let (output, profile) = match outcome {
            Some(Ok(accepted)) => accepted,
            Some(Err(code)) => {
                self.init(delta_n, h, false);
                return AccurateCalibrationResult { attempts, ..AccurateCalibrationResult::failed(code) };
            }
            None => {
                warn!("accurate calibration: {last_code} after {attempts} attempts");
                self.init(delta_n, h, false);
                return AccurateCalibrationResult { attempts, ..AccurateCalibrationResult::failed(last_code) };
            }
        };
        self.log_param_check();
        self.init(delta_n, h, false);
        AccurateCalibrationResult {
            valid: true,
            code: output.code,
            params: Some(self.calibration.scheimpflug_transformation.clone()),
            loss: output.loss,
            error: output.error,
            used_images: 1,
            attempts,
            measures: output.measures,
            bevel_image: Some(render::bevel_image(image, Some(&output.bevel), Some(&profile))),
        }
    }

    /// Calibrate on several images of the current frame, each with its own
    /// stylus orientation. Images whose fit fails are left out.
    pub fn accurate_calibration_multi(&mut self, images: &[CalibrationImage<'_>]) -> AccurateCalibrationResult {
        let Some(frame) = self.current_frame() else {
            return AccurateCalibrationResult::failed(ReturnCode::CalibrationFailedPsoInit);
        };
        let settings = self.settings.scheimpflug_transformation_calibration.clone();
        let angle = self.mini_bevel_angle();

        let mut samples = Vec::with_capacity(images.len());
        let mut used: Vec<(usize, Profile)> = Vec::with_capacity(images.len());
        for (k, item) in images.iter().enumerate() {
            let req = Request {
                image: item.image,
                r: item.delta_n,
                h: item.h,
                process: ProcessType::Calibration,
                model_type: ModelType::MiniBevel,
                label: item.label,
                optimize: true,
            };
            match self.process(&req) {
                Ok(Processed { profile, fit: Some(fit) }) => {
                    if let Some(sample) = frame_sample(fit.model.as_ref(), angle) {
                        samples.push(sample);
                        used.push((k, profile));
                    }
                }
                Ok(_) => {}
                Err(code) => debug!("multi-frame calibration: image {k} ('{}'): {code}", item.label),
            }
        }
        info!("multi-frame calibration: {}/{} images usable", samples.len(), images.len());

        let output = engine::calibrate_frames(&samples, &frame, &mut self.calibration, &settings);
        self.reporter.set(output.code);
        if output.valid {
            self.log_param_check();
        }
        let first = used.first().map(|(k, profile)| (&images[*k], profile));
        if let Some((item, _)) = first {
            self.init(item.delta_n, item.h, false);
        }
        AccurateCalibrationResult {
            valid: output.valid,
            code: output.code,
            params: output
                .valid
                .then(|| self.calibration.scheimpflug_transformation.clone()),
            loss: output.loss,
            error: output.error,
            used_images: samples.len(),
            attempts: output.attempts,
            measures: output.measures,
            bevel_image: match first {
                Some((item, profile)) if output.valid => {
                    Some(render::bevel_image(item.image, Some(&output.bevel), Some(profile)))
                }
                _ => None,
            },
        }
    }

    /// Object-plane distance (mm) between two anchor points given in
    /// object-plane window pixels.
    pub fn measure_on_object_plane(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
        let t = &self.transform;
        (t.pixel_to_mm(x1) - t.pixel_to_mm(x2)).hypot(t.pixel_to_mm(y1) - t.pixel_to_mm(y2))
    }

    #[inline]
    pub fn convert_pixel_to_mm(&self, v: f64) -> f64 {
        self.transform.pixel_to_mm(v)
    }

    #[inline]
    pub fn convert_mm_to_pixel(&self, v: f64) -> f64 {
        self.transform.mm_to_pixel(v)
    }

    /// Whether each calibrated parameter lies in its nominal range
    /// (advisory, out-of-range values are logged).
    pub fn check_calibrated_params(&self) -> BTreeMap<String, bool> {
        let check = self.calibration.check_calibrated_params();
        for (name, _) in check.iter().filter(|(_, ok)| !**ok) {
            warn!("htt: calibrated {name} outside its nominal range");
        }
        check
    }

    /// Whether each calibrated parameter sits on a bound of its nominal range.
    pub fn calibrated_params_on_bounds(&self) -> BTreeMap<String, bool> {
        self.calibration.params_on_nominal_bounds()
    }

    /// Corners `[top-left, top-right, bottom-left, bottom-right]` (window
    /// pixels) of a `width`×`height` mm field centred on `(x, y)`.
    pub fn minimum_imaging_fov(&self, x: i32, y: i32, width: f64, height: f64) -> [PixelPoint; 4] {
        let (hw, hh) = (width * 0.5, height * 0.5);
        let (xm, ym) = (self.convert_pixel_to_mm(x as f64), self.convert_pixel_to_mm(y as f64));
        let px = |a: f64, b: f64| PixelPoint::new(self.convert_mm_to_pixel(a) as i32, self.convert_mm_to_pixel(b) as i32);
        [px(xm - hw, ym + hh), px(xm + hw, ym + hh), px(xm - hw, ym - hh), px(xm + hw, ym - hh)]
    }

    /// Image of a `width`×`height` mm square centred on the object origin,
    /// seen through the nominal transform at `R = H = 0`. Corner order as in
    /// [`Self::minimum_imaging_fov`].
    pub fn reference_square(&self, width: f64, height: f64) -> [PixelPoint; 4] {
        let nominal = ScheimpflugTransform::new(&self.calibration.nominal_scheimpflug_transformation);
        let (hw, hh) = (width * 0.5, height * 0.5);
        let px = |x: f64, y: f64| {
            let p = nominal.object_to_image(Vector2::new(x, y), true);
            PixelPoint::new(p.x as i32, p.y as i32)
        };
        [px(-hw, hh), px(hw, hh), px(-hw, -hh), px(hw, -hh)]
    }

    /// `image` resampled on the object plane with the current transform.
    pub fn generate_object_plane_image(&self, image: &ImageU8) -> ImageU8 {
        ObjectPlaneView::new(&self.transform).image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::grid::tests::imaged_chart;
    use crate::transform::TransformParams;
    use approx::assert_abs_diff_eq;

    fn htt() -> Htt {
        Htt::new(Settings::default(), Calibration::default())
    }

    #[test]
    fn level_chart_estimates_the_grid_pose() {
        let t = ScheimpflugTransform::new(&TransformParams::default());
        let img = imaged_chart(&t, 7);
        let est = estimate_h(&t, &img, 0.0).unwrap();
        assert_abs_diff_eq!(est, 0.0, epsilon = 1e-6);
        assert!(estimate_h(&t, &img[..2], 0.0).is_none());
    }

    #[test]
    fn object_plane_distance_is_linear_in_pixels() {
        let h = htt();
        let d = h.measure_on_object_plane(0.0, 0.0, 3.0, 4.0);
        assert_abs_diff_eq!(d, h.convert_pixel_to_mm(5.0), epsilon = 1e-12);
        assert_abs_diff_eq!(h.convert_mm_to_pixel(h.convert_pixel_to_mm(42.0)), 42.0, epsilon = 1e-9);
    }

    #[test]
    fn field_of_view_corners_span_the_requested_size() {
        let h = htt();
        let [tl, tr, bl, _] = h.minimum_imaging_fov(280, 280, 2.0, 1.0);
        let w = h.convert_mm_to_pixel(2.0);
        let ht = h.convert_mm_to_pixel(1.0);
        assert!(((tr.x - tl.x) as f64 - w).abs() <= 1.0);
        assert!(((tl.y - bl.y) as f64 - ht).abs() <= 1.0);
        assert_eq!(tl.y, tr.y);
    }

    #[test]
    fn reference_square_does_not_move_the_transform() {
        let mut h = htt();
        h.init(4.0, 2.0, false);
        let corners = h.reference_square(3.0, 3.0);
        assert_abs_diff_eq!(h.transform().h_deg(), 2.0, epsilon = 1e-12);
        for (i, a) in corners.iter().enumerate() {
            assert!((0..560).contains(&a.x) && (0..560).contains(&a.y), "{a:?}");
            for b in &corners[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn dark_frame_fails_in_preprocessing() {
        let mut h = htt();
        let image = ImageU8::new(560, 560, 3);
        let out = h.lens_fitting(&image, 0.0, 0.0, ModelType::MiniBevel);
        assert!(!out.valid);
        assert_eq!(out.code, ReturnCode::PreprocessFailedProfileDetection);
        assert_eq!(h.print_return_code(), 104);
        assert_eq!(h.return_code(), ReturnCode::Uninitialized);

        let profile = h.profile_detection(&image, 0.0, 0.0);
        assert!(!profile.valid);
        assert!(profile.img_profile.is_empty());
    }

    #[test]
    fn blank_chart_is_not_a_grid() {
        let mut h = htt();
        let image = ImageU8::new(560, 560, 3);
        let out = h.calibrate_grid(&image, true);
        assert!(!out.valid);
        assert_eq!(out.code, ReturnCode::CalibrationFailedGrid);
        assert_eq!(h.return_code(), ReturnCode::CalibrationFailedGrid);
        assert_eq!(h.calibration(), &Calibration::default());
    }

    #[test]
    fn missing_frame_reference_fails_calibration() {
        let mut calibration = Calibration::default();
        calibration.scheimpflug_transformation_calibration.current = "unknown".into();
        let mut h = Htt::new(Settings::default(), calibration);
        let image = ImageU8::new(560, 560, 3);
        let out = h.accurate_calibration(&image, 0.0, 0.0, "frame");
        assert_eq!(out.code, ReturnCode::CalibrationFailedPsoInit);
        let out = h.accurate_calibration_multi(&[]);
        assert!(!out.valid);
        assert!(h.calibration_json().unwrap().contains("scheimpflug_transformation"));
    }

    #[test]
    fn wrong_frame_size_is_not_retried() {
        let mut h = htt();
        let image = ImageU8::new(320, 240, 3);
        let out = h.accurate_calibration(&image, 0.0, 0.0, "frame");
        assert!(!out.valid);
        assert_eq!(out.code, ReturnCode::PreprocessFailedWrongImageSize);
        assert_eq!(out.attempts, 1);
        assert_eq!(h.calibration(), &Calibration::default());
    }

    #[test]
    fn dark_frame_uses_every_calibration_attempt() {
        let mut h = htt();
        let retries = h.settings().scheimpflug_transformation_calibration.max_retries;
        let image = ImageU8::new(560, 560, 3);
        let out = h.accurate_calibration(&image, 0.0, 0.0, "frame");
        assert!(!out.valid);
        assert_eq!(out.code, ReturnCode::PreprocessFailedProfileDetection);
        assert_eq!(out.attempts, retries.max(1));
    }
}
