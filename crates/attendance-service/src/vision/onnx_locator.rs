/// Face locator backed by an ONNX face detection model
///
/// Expects a single-class YOLO-style detector whose output tensor has shape
/// `[1, 5, N]` (centre x, centre y, width, height, confidence) in model input
/// coordinates.
use super::{FaceLocator, FaceRect, MIN_FACE_SIZE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct OnnxLocatorConfig {
    /// Path to the face detection ONNX model file
    pub model_path: PathBuf,

    /// Confidence threshold for face detections (0.0 to 1.0)
    pub confidence_threshold: f32,

    /// IoU threshold for NMS
    pub iou_threshold: f32,

    /// Maximum number of faces to report per frame
    pub max_detections: usize,

    /// Model input size (width and height)
    pub input_size: u32,

    /// Execution provider preference (CPU, CUDA)
    pub execution_provider: String,

    /// GPU device ID
    pub device_id: i32,

    /// Number of intra-operation threads
    pub intra_threads: usize,
}

impl OnnxLocatorConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            confidence_threshold: 0.6,
            iou_threshold: 0.4,
            max_detections: 50,
            input_size: 640,
            execution_provider: "CPU".to_string(),
            device_id: 0,
            intra_threads: 4,
        }
    }

    pub fn with_execution_provider(mut self, provider: impl Into<String>) -> Self {
        self.execution_provider = provider.into();
        self
    }
}

/// ONNX face locator
pub struct OnnxFaceLocator {
    config: OnnxLocatorConfig,
    session: Arc<Mutex<Session>>,
    execution_provider_used: String,
}

impl OnnxFaceLocator {
    /// Load the detection model, falling back to CPU when CUDA is unavailable
    pub fn load(config: OnnxLocatorConfig) -> Result<Self> {
        let (session, provider) = create_session(&config)?;

        tracing::info!(
            "Initialized face detection model - path: {}, provider: {}, device: {}",
            config.model_path.display(),
            provider,
            config.device_id
        );

        Ok(Self {
            config,
            session: Arc::new(Mutex::new(session)),
            execution_provider_used: provider,
        })
    }

    pub fn execution_provider(&self) -> &str {
        &self.execution_provider_used
    }
}

fn create_session(config: &OnnxLocatorConfig) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "CUDA" => try_cuda(config),
        _ => try_cpu(config),
    }
}

fn try_cuda(config: &OnnxLocatorConfig) -> Result<(Session, String)> {
    tracing::info!("Attempting CUDA for {}", config.model_path.display());
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(&config.model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!("CUDA failed, using CPU: {}", e);
            try_cpu(config)
        }
    }
}

fn try_cpu(config: &OnnxLocatorConfig) -> Result<(Session, String)> {
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .commit_from_file(&config.model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}

/// Resize to the model input and convert to NCHW normalised to [0, 1]
fn preprocess(img: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb_img = resized.to_rgb8();

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));

    for (x, y, pixel) in rgb_img.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }

    input
}

/// Intersection over Union of two rectangles
fn calculate_iou(a: &FaceRect, b: &FaceRect) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.x.saturating_add(a.width).min(b.x.saturating_add(b.width));
    let y2 = a.y.saturating_add(a.height).min(b.y.saturating_add(b.height));

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) as f32 * (y2 - y1) as f32
    } else {
        0.0
    };

    let union = a.width as f32 * a.height as f32 + b.width as f32 * b.height as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Non-maximum suppression, highest confidence first
fn nms(mut boxes: Vec<(FaceRect, f32)>, iou_threshold: f32) -> Vec<(FaceRect, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(FaceRect, f32)> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|kept| calculate_iou(&kept.0, &candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Decode `[1, 5, N]` detector output into frame-space rectangles
fn postprocess(
    config: &OnnxLocatorConfig,
    output: &Array<f32, IxDyn>,
    original_width: u32,
    original_height: u32,
) -> Vec<FaceRect> {
    let scale_x = original_width as f32 / config.input_size as f32;
    let scale_y = original_height as f32 / config.input_size as f32;

    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        tracing::warn!("Unexpected detector output shape: {:?}", shape);
        return vec![];
    }

    let mut boxes = Vec::new();
    for i in 0..shape[2] {
        let confidence = output[[0, 4, i]];
        if confidence < config.confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        let x = ((cx - w / 2.0) * scale_x).max(0.0) as u32;
        let y = ((cy - h / 2.0) * scale_y).max(0.0) as u32;
        let width = (w * scale_x).min(original_width as f32) as u32;
        let height = (h * scale_y).min(original_height as f32) as u32;

        if width < MIN_FACE_SIZE || height < MIN_FACE_SIZE {
            continue;
        }

        // Boxes outside the frame are dropped before suppression
        let Some(rect) = FaceRect::new(x, y, width, height).clamp_to(original_width, original_height)
        else {
            continue;
        };
        boxes.push((rect, confidence));
    }

    nms(boxes, config.iou_threshold)
        .into_iter()
        .map(|(rect, _)| rect)
        .take(config.max_detections)
        .collect()
}

#[async_trait]
impl FaceLocator for OnnxFaceLocator {
    fn id(&self) -> &'static str {
        "onnx"
    }

    async fn locate(&self, frame: &DynamicImage, _gray: &GrayImage) -> Result<Vec<FaceRect>> {
        let input_tensor = Value::from_array(preprocess(frame, self.config.input_size))?;

        let inference_start = std::time::Instant::now();
        let mut session = self.session.lock().await;
        let outputs = session.run(ort::inputs![input_tensor])?;

        let output_value = outputs
            .get("output0")
            .or_else(|| outputs.get("output"))
            .or_else(|| outputs.get("boxes"))
            .context("No detection output tensor found")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

        let faces = postprocess(&self.config, &output, frame.width(), frame.height());

        tracing::debug!(
            faces = faces.len(),
            provider = %self.execution_provider_used,
            inference_ms = inference_start.elapsed().as_millis() as u64,
            "Face detection complete"
        );

        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OnnxLocatorConfig {
        let mut config = OnnxLocatorConfig::new("models/face.onnx");
        config.input_size = 100;
        config
    }

    #[test]
    fn test_config_defaults() {
        let config = OnnxLocatorConfig::new("m.onnx").with_execution_provider("CUDA");
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.iou_threshold, 0.4);
        assert_eq!(config.max_detections, 50);
        assert_eq!(config.input_size, 640);
        assert_eq!(config.execution_provider, "CUDA");
    }

    #[test]
    fn test_calculate_iou() {
        let box1 = FaceRect::new(10, 10, 50, 50);
        let box2 = FaceRect::new(30, 30, 50, 50);

        let iou = calculate_iou(&box1, &box2);
        assert!(iou > 0.0 && iou < 1.0);

        // Identical boxes
        assert!((calculate_iou(&box1, &box1) - 1.0).abs() < 0.001);

        // Non-overlapping boxes
        let box3 = FaceRect::new(100, 100, 50, 50);
        assert_eq!(calculate_iou(&box1, &box3), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest_overlap() {
        let boxes = vec![
            (FaceRect::new(10, 10, 50, 50), 0.7),
            (FaceRect::new(12, 12, 50, 50), 0.9),
            (FaceRect::new(200, 200, 50, 50), 0.8),
        ];

        let kept = nms(boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, FaceRect::new(12, 12, 50, 50));
        assert_eq!(kept[1].0, FaceRect::new(200, 200, 50, 50));
    }

    #[test]
    fn test_postprocess_scales_and_filters() {
        let config = test_config();
        // Three predictions: one confident face, one below threshold, one too small
        let mut output: Array<f32, IxDyn> = Array::zeros(IxDyn(&[1, 5, 3]));
        let predictions: [[f32; 5]; 3] = [
            [50.0, 50.0, 40.0, 40.0, 0.95],
            [20.0, 20.0, 40.0, 40.0, 0.30],
            [80.0, 80.0, 4.0, 4.0, 0.99],
        ];
        for (i, p) in predictions.iter().enumerate() {
            for (c, v) in p.iter().enumerate() {
                output[[0, c, i]] = *v;
            }
        }

        // Frame is twice the model input size
        let faces = postprocess(&config, &output, 200, 200);
        assert_eq!(faces, vec![FaceRect::new(60, 60, 80, 80)]);
    }

    #[test]
    fn test_iou_near_coordinate_limit() {
        let edge = FaceRect::new(u32::MAX - 10, u32::MAX - 10, 80, 80);
        let iou = calculate_iou(&edge, &edge);
        assert!(iou.is_finite());
        assert_eq!(calculate_iou(&edge, &FaceRect::new(0, 0, 50, 50)), 0.0);
    }

    #[test]
    fn test_postprocess_drops_boxes_outside_frame() {
        let config = test_config();
        let mut output: Array<f32, IxDyn> = Array::zeros(IxDyn(&[1, 5, 2]));
        let predictions: [[f32; 5]; 2] = [
            [1.0e12, 1.0e12, 40.0, 40.0, 0.97],
            [50.0, 50.0, 40.0, 40.0, 0.95],
        ];
        for (i, p) in predictions.iter().enumerate() {
            for (c, v) in p.iter().enumerate() {
                output[[0, c, i]] = *v;
            }
        }

        let faces = postprocess(&config, &output, 200, 200);
        assert_eq!(faces, vec![FaceRect::new(60, 60, 80, 80)]);
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let config = test_config();
        let output: Array<f32, IxDyn> = Array::zeros(IxDyn(&[1, 3]));
        assert!(postprocess(&config, &output, 100, 100).is_empty());
    }

    #[test]
    fn test_preprocess_layout() {
        let img = DynamicImage::new_rgb8(10, 10);
        let input = preprocess(&img, 16);
        assert_eq!(input.shape(), &[1, 3, 16, 16]);
    }
}
