use bevel_calib::config::{self, JobConfig, JobMode};
use bevel_calib::image::io::{load_image, save_u8, write_json_file};
use bevel_calib::image::ImageU8;
use bevel_calib::model::ModelType;
use bevel_calib::pipeline::CalibrationImage;
use bevel_calib::Htt;
use serde_json::{json, Value};
use std::env;
use std::path::Path;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let job_path = env::args().nth(1).ok_or_else(usage)?;
    let job = config::load_job(Path::new(&job_path))?;
    let settings = config::load_settings(&job.settings)?;
    let calibration = config::load_calibration(&job.calibration)?;
    let images = job
        .images
        .iter()
        .map(|item| load_image(&item.path))
        .collect::<Result<Vec<ImageU8>, String>>()?;

    let mut htt = Htt::new(settings, calibration);
    let report = execute(&mut htt, &job, &images)?;
    let code = htt.print_return_code();

    println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
    if let Some(path) = &job.json_out {
        write_json_file(path, &report)?;
        println!("JSON report written to {}", path.display());
    }
    let calibrated = report.get("valid").and_then(Value::as_bool).unwrap_or(false)
        && matches!(job.mode, JobMode::GridCalibration | JobMode::AccurateCalibration);
    if job.save_calibration && calibrated {
        config::save_calibration(&job.calibration, htt.calibration())?;
        println!("Calibration written to {}", job.calibration.display());
    }
    println!("Return code {code}");
    Ok(())
}

fn execute(htt: &mut Htt, job: &JobConfig, images: &[ImageU8]) -> Result<Value, String> {
    let first = &job.images[0];
    let image = &images[0];
    let model = job.model.unwrap_or(ModelType::MiniBevel);
    let report = match job.mode {
        JobMode::LensFitting | JobMode::LensValidation => {
            let out = if job.mode == JobMode::LensFitting {
                htt.lens_fitting(image, first.delta_n, first.h, model)
            } else {
                htt.lens_validation(image, first.delta_n, first.h, model)
            };
            if let (Some(path), Some(img)) = (&job.json_out, &out.bevel_image) {
                save_u8(img, &path.with_extension("png"))?;
            }
            json!({
                "valid": out.valid,
                "code": out.code.value(),
                "model": out.model_type,
                "loss": out.loss,
                "iteration": out.iteration,
                "measures": out.measures,
                "realMeasures": out.real_measures,
                "errors": out.errors,
                "bevel": out.img_bevel,
                "modelPoints": out.img_model_points,
            })
        }
        JobMode::ProfileDetection => {
            let out = htt.profile_detection(image, first.delta_n, first.h);
            json!({ "valid": out.valid, "code": out.code.value(), "profile": out.img_profile })
        }
        JobMode::GridCalibration => {
            let out = htt.calibrate_grid(image, job.save_calibration);
            json!({
                "valid": out.valid,
                "code": out.code.value(),
                "loss": out.loss,
                "params": out.params,
                "intersections": out.img_intersections,
                "errors": out.errors,
                "estimatedH": out.estimated_h,
            })
        }
        JobMode::AccurateCalibration => {
            let out = if images.len() == 1 {
                htt.accurate_calibration(image, first.delta_n, first.h, "frame")
            } else {
                let labels: Vec<String> = (0..images.len()).map(|i| format!("frame_{i:02}")).collect();
                let items: Vec<CalibrationImage<'_>> = job
                    .images
                    .iter()
                    .zip(images)
                    .zip(&labels)
                    .map(|((item, image), label)| CalibrationImage {
                        image,
                        delta_n: item.delta_n,
                        h: item.h,
                        label,
                    })
                    .collect();
                htt.accurate_calibration_multi(&items)
            };
            json!({
                "valid": out.valid,
                "code": out.code.value(),
                "loss": out.loss,
                "error": out.error,
                "usedImages": out.used_images,
                "params": out.params,
                "measures": out.measures.map(|m| json!({
                    "B": m.b, "M": m.m, "angle1": m.angle1, "angle2": m.angle2,
                })),
                "paramsInRange": htt.check_calibrated_params(),
                "paramsOnBounds": htt.calibrated_params_on_bounds(),
            })
        }
    };
    Ok(report)
}

fn usage() -> String {
    "Usage: bevel_fit <job.json>".to_string()
}
