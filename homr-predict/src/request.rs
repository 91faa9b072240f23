//! Request parameters and the engine configuration records derived from them
//!
//! `build_configs` is a pure mapping: no I/O, no hidden state. The fixed
//! deployment policy lives in [`ProcessingConfig::deployment`]; only
//! `large_page`, `metronome_bpm` and `tempo_bpm` vary per request.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PredictError;

/// Parameters of one prediction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Sheet music image (JPEG or PNG)
    pub image: PathBuf,
    /// Emit MusicXML laid out for a larger page
    #[serde(default)]
    pub large_page: bool,
    /// Add a metronome marking at this BPM
    #[serde(default)]
    pub metronome_bpm: Option<u32>,
    /// Add a tempo marking at this BPM
    #[serde(default)]
    pub tempo_bpm: Option<u32>,
}

impl PredictRequest {
    /// Request with every optional parameter at its default
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            large_page: false,
            metronome_bpm: None,
            tempo_bpm: None,
        }
    }

    pub fn with_large_page(mut self, large_page: bool) -> Self {
        self.large_page = large_page;
        self
    }

    pub fn with_metronome_bpm(mut self, bpm: u32) -> Self {
        self.metronome_bpm = Some(bpm);
        self
    }

    pub fn with_tempo_bpm(mut self, bpm: u32) -> Self {
        self.tempo_bpm = Some(bpm);
        self
    }

    /// Reject parameters the engine contract cannot express
    ///
    /// A BPM that is present must be positive. Zero is rejected rather than
    /// mapped to "no marking".
    pub fn validate(&self) -> Result<(), PredictError> {
        if self.image.as_os_str().is_empty() {
            return Err(PredictError::InvalidInput("image path is empty".to_string()));
        }
        if self.metronome_bpm == Some(0) {
            return Err(PredictError::InvalidInput(
                "metronome_bpm must be a positive integer".to_string(),
            ));
        }
        if self.tempo_bpm == Some(0) {
            return Err(PredictError::InvalidInput(
                "tempo_bpm must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which staves the engine should process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffSelection {
    All,
    Single(u32),
}

impl StaffSelection {
    /// Index passed to the engine, where -1 means every staff
    pub fn as_engine_index(&self) -> i64 {
        match self {
            StaffSelection::All => -1,
            StaffSelection::Single(index) => i64::from(*index),
        }
    }
}

/// Engine runtime mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    pub enable_debug: bool,
    pub enable_cache: bool,
    pub write_staff_positions: bool,
    pub read_staff_positions: bool,
    pub selected_staff: StaffSelection,
    pub use_gpu_inference: bool,
}

impl ProcessingConfig {
    /// Fixed policy for the prediction service
    pub const fn deployment() -> Self {
        Self {
            enable_debug: false,
            enable_cache: false,
            write_staff_positions: false,
            read_staff_positions: false,
            selected_staff: StaffSelection::All,
            use_gpu_inference: true,
        }
    }
}

/// Output-shaping directives for MusicXML generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlGeneratorArguments {
    pub large_page: bool,
    pub metronome: Option<u32>,
    pub tempo: Option<u32>,
}

/// Map request parameters to the two engine configuration records
pub fn build_configs(request: &PredictRequest) -> (ProcessingConfig, XmlGeneratorArguments) {
    let xml_args = XmlGeneratorArguments {
        large_page: request.large_page,
        metronome: request.metronome_bpm,
        tempo: request.tempo_bpm,
    };
    (ProcessingConfig::deployment(), xml_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_leave_directives_absent() {
        let (_, xml_args) = build_configs(&PredictRequest::new("/data/score.png"));

        assert!(!xml_args.large_page);
        assert_eq!(xml_args.metronome, None);
        assert_eq!(xml_args.tempo, None);
    }

    #[test]
    fn test_metronome_passes_through_exactly() {
        let request = PredictRequest::new("/data/score.png").with_metronome_bpm(120);
        let (_, xml_args) = build_configs(&request);

        assert_eq!(xml_args.metronome, Some(120));
        assert_eq!(xml_args.tempo, None);
    }

    #[test]
    fn test_metronome_and_tempo_coexist() {
        let request = PredictRequest::new("/data/score.png")
            .with_metronome_bpm(120)
            .with_tempo_bpm(90);
        let (_, xml_args) = build_configs(&request);

        assert_eq!(xml_args.metronome, Some(120));
        assert_eq!(xml_args.tempo, Some(90));
    }

    #[test]
    fn test_processing_config_ignores_request_parameters() {
        let plain = PredictRequest::new("/a.png");
        let loaded = PredictRequest::new("/b.jpg")
            .with_large_page(true)
            .with_metronome_bpm(60)
            .with_tempo_bpm(200);

        let (config_a, _) = build_configs(&plain);
        let (config_b, _) = build_configs(&loaded);

        assert_eq!(config_a, config_b);
        assert!(!config_a.enable_debug);
        assert!(!config_a.enable_cache);
        assert!(!config_a.write_staff_positions);
        assert!(!config_a.read_staff_positions);
        assert_eq!(config_a.selected_staff, StaffSelection::All);
        assert_eq!(config_a.selected_staff.as_engine_index(), -1);
        assert!(config_a.use_gpu_inference);
    }

    #[test]
    fn test_zero_bpm_is_rejected_not_coerced() {
        let request = PredictRequest::new("/data/score.png").with_metronome_bpm(0);
        assert!(matches!(request.validate(), Err(PredictError::InvalidInput(_))));

        let request = PredictRequest::new("/data/score.png").with_tempo_bpm(0);
        assert!(matches!(request.validate(), Err(PredictError::InvalidInput(_))));

        // build_configs never rewrites values, even invalid ones
        let (_, xml_args) = build_configs(&PredictRequest::new("/x.png").with_tempo_bpm(0));
        assert_eq!(xml_args.tempo, Some(0));
    }

    #[test]
    fn test_empty_image_path_is_rejected() {
        let request = PredictRequest::new("");
        assert!(matches!(request.validate(), Err(PredictError::InvalidInput(_))));
    }

    #[test]
    fn test_json_null_and_missing_are_absent() {
        let request: PredictRequest =
            serde_json::from_str(r#"{"image": "/data/a.png", "metronome_bpm": null}"#).unwrap();

        assert!(!request.large_page);
        assert_eq!(request.metronome_bpm, None);
        assert_eq!(request.tempo_bpm, None);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_single_staff_index() {
        assert_eq!(StaffSelection::Single(2).as_engine_index(), 2);
    }
}
