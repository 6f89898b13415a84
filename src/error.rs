//! Return-code taxonomy shared by every processing stage.
//!
//! Codes are grouped by stage (1xx preprocessing, 2xx calibration, 3xx lens
//! fitting). Each stage returns `Result<_, ReturnCode>`; success codes travel
//! inside result structs. [`ReturnCodeReporter`] keeps a single pending code
//! for callers that poll a "last status".
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum ReturnCode {
    #[default]
    #[error("Uninitialized")]
    Uninitialized = 0,

    #[error("Pre-process successful")]
    PreprocessSuccessful = 100,
    #[error("Pre-process failed: image not available")]
    PreprocessFailedImageNotAvailable = 101,
    #[error("Pre-process failed: wrong image size")]
    PreprocessFailedWrongImageSize = 102,
    #[error("Pre-process failed: wrong image channels number")]
    PreprocessFailedWrongImageChannel = 103,
    #[error("Pre-process failed: profile detection failed")]
    PreprocessFailedProfileDetection = 104,

    #[error("Calibration successful")]
    CalibrationSuccessful = 200,
    #[error("Calibration failed: convergence not reached")]
    CalibrationFailedConvergence = 201,
    #[error("Calibration failed: grid not detected")]
    CalibrationFailedGrid = 202,
    #[error("Calibration failed: line detection failed")]
    CalibrationFailedLineDetection = 203,
    #[error("Calibration failed: search space boundary reached")]
    CalibrationFailedSearchSpace = 204,
    #[error("Calibration failed: PSO initialization failed")]
    CalibrationFailedPsoInit = 205,

    #[error("Lens fitting successful")]
    LensFittingSuccessful = 300,
    #[error("Lens fitting failed: model not initialized")]
    LensFittingFailedModelNotInitialized = 301,
    #[error("Lens fitting failed: max retries reached")]
    LensFittingFailedMaxRetriesReached = 302,
    #[error("Lens fitting failed: bevel-frame intersection")]
    LensFittingFailedBevelFrameIntersection = 303,
    #[error("Lens fitting failed: PSO boundary reached")]
    LensFittingFailedPsoBoundaryReached = 304,
}

impl ReturnCode {
    /// Stable numeric value of the code.
    #[inline]
    pub fn value(self) -> i32 {
        self as i32
    }

    /// True for the three stage-level success codes.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ReturnCode::PreprocessSuccessful
                | ReturnCode::CalibrationSuccessful
                | ReturnCode::LensFittingSuccessful
        )
    }

    /// Boundary-reached lens fits still carry a usable result.
    pub fn is_soft_success(self) -> bool {
        self.is_success() || self == ReturnCode::LensFittingFailedPsoBoundaryReached
    }

    /// Frame mismatches that no retry can change.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ReturnCode::PreprocessFailedImageNotAvailable
                | ReturnCode::PreprocessFailedWrongImageSize
                | ReturnCode::PreprocessFailedWrongImageChannel
        )
    }

    pub fn from_value(value: i32) -> Option<Self> {
        use ReturnCode::*;
        let code = match value {
            0 => Uninitialized,
            100 => PreprocessSuccessful,
            101 => PreprocessFailedImageNotAvailable,
            102 => PreprocessFailedWrongImageSize,
            103 => PreprocessFailedWrongImageChannel,
            104 => PreprocessFailedProfileDetection,
            200 => CalibrationSuccessful,
            201 => CalibrationFailedConvergence,
            202 => CalibrationFailedGrid,
            203 => CalibrationFailedLineDetection,
            204 => CalibrationFailedSearchSpace,
            205 => CalibrationFailedPsoInit,
            300 => LensFittingSuccessful,
            301 => LensFittingFailedModelNotInitialized,
            302 => LensFittingFailedMaxRetriesReached,
            303 => LensFittingFailedBevelFrameIntersection,
            304 => LensFittingFailedPsoBoundaryReached,
            _ => return None,
        };
        Some(code)
    }
}

/// Holds exactly one pending code; reading it resets the slot.
#[derive(Clone, Debug, Default)]
pub struct ReturnCodeReporter {
    pending: ReturnCode,
}

impl ReturnCodeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&mut self, code: ReturnCode) {
        self.pending = code;
    }

    /// Record the outcome of a stage and pass it through unchanged.
    pub fn record<T>(&mut self, result: Result<T, ReturnCode>, success: ReturnCode) -> Result<T, ReturnCode> {
        match &result {
            Ok(_) => self.set(success),
            Err(code) => self.set(*code),
        }
        result
    }

    #[inline]
    pub fn peek(&self) -> ReturnCode {
        self.pending
    }

    /// Return the pending code and reset it to `Uninitialized`.
    pub fn take(&mut self) -> ReturnCode {
        std::mem::take(&mut self.pending)
    }

    /// Log the pending code, consume it and return its numeric value.
    pub fn print(&mut self) -> i32 {
        let code = self.take();
        info!("Return code {}: {}", code.value(), code);
        code.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_pending_code() {
        let mut reporter = ReturnCodeReporter::new();
        reporter.set(ReturnCode::CalibrationFailedGrid);
        assert_eq!(reporter.peek(), ReturnCode::CalibrationFailedGrid);
        assert_eq!(reporter.take(), ReturnCode::CalibrationFailedGrid);
        assert_eq!(reporter.take(), ReturnCode::Uninitialized);
    }

    #[test]
    fn values_and_messages_are_stable() {
        assert_eq!(ReturnCode::PreprocessFailedProfileDetection.value(), 104);
        assert_eq!(ReturnCode::LensFittingFailedPsoBoundaryReached.value(), 304);
        assert_eq!(
            ReturnCode::CalibrationFailedGrid.to_string(),
            "Calibration failed: grid not detected"
        );
        for v in [0, 100, 104, 200, 205, 300, 304] {
            let code = ReturnCode::from_value(v).unwrap();
            assert_eq!(code.value(), v);
        }
        assert!(ReturnCode::from_value(7).is_none());
    }

    #[test]
    fn record_maps_ok_to_success_code() {
        let mut reporter = ReturnCodeReporter::new();
        let ok: Result<u8, ReturnCode> = Ok(1);
        let _ = reporter.record(ok, ReturnCode::PreprocessSuccessful);
        assert_eq!(reporter.print(), 100);
        let err: Result<u8, ReturnCode> = Err(ReturnCode::PreprocessFailedWrongImageSize);
        let _ = reporter.record(err, ReturnCode::PreprocessSuccessful);
        assert_eq!(reporter.take(), ReturnCode::PreprocessFailedWrongImageSize);
        assert!(ReturnCode::LensFittingFailedPsoBoundaryReached.is_soft_success());
    }

    #[test]
    fn only_frame_mismatches_are_structural() {
        assert!(ReturnCode::PreprocessFailedWrongImageSize.is_structural());
        assert!(ReturnCode::PreprocessFailedWrongImageChannel.is_structural());
        assert!(ReturnCode::PreprocessFailedImageNotAvailable.is_structural());
        assert!(!ReturnCode::PreprocessFailedProfileDetection.is_structural());
        assert!(!ReturnCode::CalibrationFailedConvergence.is_structural());
    }
}
