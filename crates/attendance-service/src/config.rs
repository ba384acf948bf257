use anyhow::{anyhow, Context, Result};
use common::attendance::RecognitionSettings;
use common::validation::{validate_range, validate_threshold, MAX_DUPLICATE_WINDOW_SECS};
use std::env;
use std::path::PathBuf;

/// Default request body limit; webcam frames arrive base64-encoded
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Which face locator to run
#[derive(Debug, Clone, PartialEq)]
pub enum LocatorKind {
    /// Centered crop for a fixed kiosk camera
    Framing,
    /// ONNX face detection model
    Onnx { model_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct AttendanceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Directory holding snapshots, the recognizer model and face crops
    pub data_dir: PathBuf,

    /// Recognition settings used until settings.json overrides them
    pub settings: RecognitionSettings,

    /// Face locator selection
    pub locator: LocatorKind,

    /// Execution provider for the ONNX locator (CPU, CUDA)
    pub execution_provider: String,

    /// When set, annotated recognition frames are written here
    pub debug_image_dir: Option<PathBuf>,

    /// Maximum accepted request body in bytes
    pub max_body_bytes: usize,

    /// Identifier attached to logs
    pub node_id: String,
}

impl AttendanceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("ATTENDANCE_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());

        let data_dir = PathBuf::from(lookup("ATTENDANCE_DATA_DIR").unwrap_or_else(|| "data".to_string()));

        let acceptance_threshold = match lookup("ACCEPTANCE_THRESHOLD") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .context("Invalid ACCEPTANCE_THRESHOLD")?,
            None => common::attendance::default_acceptance_threshold(),
        };
        validate_threshold(acceptance_threshold, "ACCEPTANCE_THRESHOLD")?;

        let duplicate_window_secs = match lookup("DUPLICATE_WINDOW_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .context("Invalid DUPLICATE_WINDOW_SECS")?,
            None => common::attendance::default_duplicate_window_secs(),
        };
        validate_range(
            duplicate_window_secs,
            0,
            MAX_DUPLICATE_WINDOW_SECS,
            "DUPLICATE_WINDOW_SECS",
        )?;

        let locator = match lookup("FACE_LOCATOR")
            .unwrap_or_else(|| "framing".to_string())
            .to_lowercase()
            .as_str()
        {
            "framing" => LocatorKind::Framing,
            "onnx" => {
                let model_path = lookup("FACE_DETECTION_MODEL")
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("FACE_DETECTION_MODEL required for the onnx locator"))?;
                LocatorKind::Onnx { model_path }
            }
            other => return Err(anyhow!("Unknown FACE_LOCATOR '{}'", other)),
        };

        let execution_provider =
            lookup("FACE_EXECUTION_PROVIDER").unwrap_or_else(|| "CPU".to_string());

        let debug_image_dir = lookup("DEBUG_IMAGE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let max_body_bytes = match lookup("MAX_BODY_BYTES") {
            Some(raw) => raw.trim().parse::<usize>().context("Invalid MAX_BODY_BYTES")?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let node_id = lookup("NODE_ID").unwrap_or_else(|| {
            format!(
                "attendance-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        Ok(Self {
            bind_addr,
            data_dir,
            settings: RecognitionSettings {
                acceptance_threshold,
                duplicate_window_secs,
            },
            locator,
            execution_provider,
            debug_image_dir,
            max_body_bytes,
            node_id,
        })
    }
}
