mod common;

use bevel_calib::model::ModelType;
use bevel_calib::pipeline::CalibrationImage;
use bevel_calib::{Calibration, Htt, ReturnCode, Settings};
use common::synthetic::{rgb_frame, ridge_frame};

fn htt_with(settings: Settings) -> Htt {
    let _ = env_logger::builder().is_test(true).try_init();
    Htt::new(settings, Calibration::default())
}

#[test]
fn profile_detection_follows_the_ridge() {
    let mut htt = htt_with(Settings::default());
    let frame = ridge_frame(560, 560, 250.0, 3.0);
    let out = htt.profile_detection(&frame, 0.0, 0.0);
    assert!(out.valid);
    assert_eq!(out.code, ReturnCode::PreprocessSuccessful);
    assert!(out.img_profile.iter().all(|p| (p.x - 250).abs() <= 3));
    assert_eq!(htt.print_return_code(), 100);
}

#[test]
fn straight_edge_has_no_bevel_to_fit() {
    let mut htt = htt_with(Settings::default());
    let frame = ridge_frame(560, 560, 250.0, 3.0);
    let out = htt.lens_fitting(&frame, 0.0, 0.0, ModelType::MiniBevel);
    assert!(!out.valid);
    assert_eq!(out.code, ReturnCode::LensFittingFailedModelNotInitialized);
    assert_eq!(out.model_type, Some(ModelType::MiniBevel));
    assert_eq!(htt.return_code(), ReturnCode::LensFittingFailedModelNotInitialized);
}

#[test]
fn disabled_optimization_reports_the_profile_only() {
    let mut settings = Settings::default();
    settings.optimization.enabled = false;
    let mut htt = htt_with(settings);
    let frame = ridge_frame(560, 560, 250.0, 3.0);
    let out = htt.lens_fitting(&frame, 0.0, 0.0, ModelType::TBevel);
    assert!(out.valid);
    assert_eq!(out.code, ReturnCode::PreprocessSuccessful);
    assert!(!out.img_profile.is_empty());
    assert_eq!(out.obj_profile.len(), out.img_profile.len());
    assert!(out.img_bevel.is_empty());
    assert!(out.measures.is_empty());
    assert!(out.bevel_image.is_none());
}

#[test]
fn wrong_frames_are_rejected_by_every_request() {
    let mut htt = htt_with(Settings::default());
    let small = rgb_frame(100, 100, |_, _| 0);
    let fit = htt.lens_validation(&small, 0.0, 0.0, ModelType::CustomBevel);
    assert_eq!(fit.code, ReturnCode::PreprocessFailedWrongImageSize);
    assert_eq!(htt.print_return_code(), 102);
    assert_eq!(htt.print_return_code(), 0);

    let images = [CalibrationImage {
        image: &small,
        delta_n: 0.0,
        h: 0.0,
        label: "small",
    }];
    let calibration = htt.accurate_calibration_multi(&images);
    assert!(!calibration.valid);
    assert_eq!(calibration.used_images, 0);
    assert!(calibration.params.is_none());
    assert_eq!(htt.calibration(), &Calibration::default());
}

#[test]
fn uniform_chart_fails_grid_calibration() {
    let mut htt = htt_with(Settings::default());
    let frame = rgb_frame(560, 560, |_, _| 128);
    let out = htt.calibrate_grid(&frame, false);
    assert!(!out.valid);
    assert_eq!(out.code, ReturnCode::CalibrationFailedGrid);
    assert!(out.img_intersections.is_empty());
    assert!(out.errors.is_none());
}
