use crate::store::{AttendanceStore, Detection, FaceSample, StorePaths};
use crate::vision::{
    debug::write_annotated_frame, decoder::decode_image, equalized_gray, normalize_face,
    FaceLocator, FaceRect,
};
use anyhow::{Context, Result};
use common::attendance::{
    AttendanceEvent, DashboardStats, RecognitionSettings, StudentDirectory, UpdateSettingsRequest,
};
use common::validation::{
    local_now, validate_id, validate_name, validate_range, MAX_REGISTRATION_IMAGES,
};
use image::{DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry::metrics::{ATTENDANCE_RECOGNITION_LATENCY, ATTENDANCE_REGISTRATIONS};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Shared application state handed to every handler.
///
/// All mutations of the store go through the write half of one lock, so the
/// duplicate check and the append that follows it cannot interleave with
/// another request.
#[derive(Clone)]
pub struct AttendanceService {
    inner: Arc<AttendanceServiceInner>,
}

struct AttendanceServiceInner {
    node_id: String,
    locator: Arc<dyn FaceLocator>,
    store: RwLock<AttendanceStore>,
    paths: StorePaths,
    debug_image_dir: Option<PathBuf>,
}

impl AttendanceService {
    pub fn new(node_id: String, locator: Arc<dyn FaceLocator>, store: AttendanceStore) -> Self {
        let paths = store.paths().clone();
        Self {
            inner: Arc::new(AttendanceServiceInner {
                node_id,
                locator,
                store: RwLock::new(store),
                paths,
                debug_image_dir: None,
            }),
        }
    }

    /// Same as [`AttendanceService::new`], additionally writing annotated
    /// recognition frames to `debug_image_dir`
    pub fn with_debug_images(
        node_id: String,
        locator: Arc<dyn FaceLocator>,
        store: AttendanceStore,
        debug_image_dir: PathBuf,
    ) -> Self {
        let paths = store.paths().clone();
        Self {
            inner: Arc::new(AttendanceServiceInner {
                node_id,
                locator,
                store: RwLock::new(store),
                paths,
                debug_image_dir: Some(debug_image_dir),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn locator_id(&self) -> &'static str {
        self.inner.locator.id()
    }

    /// Locate faces in `frame`; detection errors count as no faces
    async fn locate(&self, frame: &DynamicImage, gray: &GrayImage) -> Vec<FaceRect> {
        match self.inner.locator.locate(frame, gray).await {
            Ok(faces) => faces,
            Err(e) => {
                error!(locator = self.locator_id(), "Face detection failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Recognise every face in `image` and record attendance for the matches.
    /// Returns only the events created by this call.
    pub async fn mark_attendance(&self, image: &str) -> Vec<AttendanceEvent> {
        let timer = ATTENDANCE_RECOGNITION_LATENCY.start_timer();

        let frame = match decode_image(image) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Could not decode image: {:#}", e);
                return Vec::new();
            }
        };
        let gray = equalized_gray(&frame);

        let faces = self.locate(&frame, &gray).await;
        info!(faces = faces.len(), "Detected faces");

        if let Some(dir) = &self.inner.debug_image_dir {
            match write_annotated_frame(dir, &frame, &faces) {
                Ok(path) => debug!(path = %path.display(), "Saved debug frame"),
                Err(e) => warn!("Failed to save debug frame: {:#}", e),
            }
        }

        if faces.is_empty() {
            return Vec::new();
        }

        let detections: Vec<Detection> = {
            let store = self.inner.store.read().await;
            faces
                .iter()
                .filter_map(|rect| normalize_face(&gray, *rect))
                .filter_map(|face| store.predict(&face))
                .inspect(|p| debug!(label = %p.label, distance = p.distance, "Recognition result"))
                .map(Detection::from)
                .collect()
        };

        let events = if detections.is_empty() {
            Vec::new()
        } else {
            self.inner
                .store
                .write()
                .await
                .record_attendance(&detections)
        };

        timer.observe_duration();
        events
    }

    /// Detect the first face in each image, save the crops and train the
    /// matcher. Returns `Ok(false)` when nothing could be registered.
    ///
    /// Crops are staged next to the student's face directory and replace it
    /// only once training succeeded, so a failed attempt leaves the previous
    /// registration's crops untouched.
    pub async fn register_student(
        &self,
        student_id: &str,
        name: &str,
        images: &[String],
    ) -> Result<bool> {
        if let Err(e) = validate_registration(student_id, name, images.len()) {
            warn!("Rejected registration: {:#}", e);
            ATTENDANCE_REGISTRATIONS.with_label_values(&["invalid"]).inc();
            return Ok(false);
        }

        info!(student_id, name, images = images.len(), "Registering student");
        let face_dir = self.inner.paths.face_dir(student_id);
        let staging = self
            .inner
            .paths
            .faces
            .join(format!(".staging-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;

        let mut samples = Vec::new();
        for (idx, payload) in images.iter().enumerate() {
            let frame = match decode_image(payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(student_id, image = idx, "Could not decode image: {:#}", e);
                    continue;
                }
            };
            let gray = equalized_gray(&frame);

            let Some(face) = self
                .locate(&frame, &gray)
                .await
                .first()
                .and_then(|rect| normalize_face(&gray, *rect))
            else {
                info!(student_id, image = idx, "No face detected in image");
                continue;
            };

            let file_name = format!("face_{}.jpg", idx);
            let saved_path = match face.save(staging.join(&file_name)) {
                Ok(()) => Some(face_dir.join(&file_name).display().to_string()),
                Err(e) => {
                    warn!(student_id, image = idx, "Failed to save face crop: {}", e);
                    None
                }
            };
            samples.push(FaceSample { face, saved_path });
        }

        let today = local_now().date();
        let mut store = self.inner.store.write().await;
        let registered = store.register(student_id, name, samples, today);

        // Swapped under the write lock so concurrent registrations of one id
        // cannot interleave their directories
        let settled = if registered {
            replace_dir(&staging, &face_dir)
        } else {
            std::fs::remove_dir_all(&staging)
                .with_context(|| format!("failed to remove {}", staging.display()))
        };
        if let Err(e) = settled {
            warn!(student_id, "Failed to settle face crops: {:#}", e);
        }

        Ok(registered)
    }

    pub async fn list_attendance(&self) -> Vec<AttendanceEvent> {
        self.inner.store.read().await.list_attendance()
    }

    pub async fn students(&self) -> StudentDirectory {
        self.inner.store.read().await.students().clone()
    }

    pub async fn dashboard_stats(&self) -> DashboardStats {
        let today = local_now().date();
        self.inner.store.read().await.dashboard_stats(today)
    }

    pub async fn settings(&self) -> RecognitionSettings {
        self.inner.store.read().await.settings()
    }

    pub async fn update_settings(&self, update: &UpdateSettingsRequest) -> Result<RecognitionSettings> {
        self.inner.store.write().await.update_settings(update)
    }

    /// Whether the face locator can serve requests
    pub async fn is_ready(&self) -> bool {
        match self.inner.locator.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(locator = self.locator_id(), "Locator health check failed: {:#}", e);
                false
            }
        }
    }

    /// Flush every snapshot before exit
    pub async fn shutdown(&self) -> Result<()> {
        info!(node_id = %self.inner.node_id, "Flushing attendance store");
        self.inner.store.read().await.persist_all();
        Ok(())
    }
}

/// Checks shared by the HTTP layer and the service
pub fn validate_registration(student_id: &str, name: &str, image_count: usize) -> Result<()> {
    validate_id(student_id, "student_id")?;
    validate_name(name, "name")?;
    validate_range(image_count, 1, MAX_REGISTRATION_IMAGES, "images")
}

/// Move `staging` into place at `target`, dropping whatever was there
fn replace_dir(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)
            .with_context(|| format!("failed to remove {}", target.display()))?;
    }
    std::fs::rename(staging, target)
        .with_context(|| format!("failed to move face crops to {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{locator::FramingLocator, FaceMatcher, Prediction};
    use base64::{prelude::BASE64_STANDARD, Engine};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn encode_png(image: RgbImage) -> String {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes))
    }

    fn textured_frame() -> String {
        encode_png(RgbImage::from_fn(240, 240, |x, y| {
            let v = ((x / 6) ^ (y / 4)).wrapping_mul(37) as u8;
            Rgb([v, v / 2, 255 - v])
        }))
    }

    fn service(dir: &TempDir) -> AttendanceService {
        let store = AttendanceStore::open(dir.path(), RecognitionSettings::default());
        AttendanceService::new(
            "attendance-test".to_string(),
            Arc::new(FramingLocator::new()),
            store,
        )
    }

    #[tokio::test]
    async fn test_register_then_mark_once() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let frame = textured_frame();

        assert!(service
            .register_student("1", "Alice", &[frame.clone()])
            .await
            .unwrap());

        let students = service.students().await;
        assert_eq!(students["1"].name, "Alice");
        assert_eq!(students["1"].face_sample_paths.len(), 1);
        assert!(dir.path().join("faces/1/face_0.jpg").exists());
        assert!(dir.path().join("trainer.json").exists());

        let events = service.mark_attendance(&frame).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].student_id, "1");
        assert_eq!(events[0].confidence, Some(0.0));

        // Immediate second frame falls inside the duplicate window
        assert!(service.mark_attendance(&frame).await.is_empty());
        assert_eq!(service.list_attendance().await.len(), 1);

        let stats = service.dashboard_stats().await;
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.today_attendance, 1);
        assert_eq!(stats.attendance_rate, 100.0);
    }

    #[tokio::test]
    async fn test_register_skips_undecodable_images() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(!service
            .register_student("1", "Alice", &["not an image".to_string()])
            .await
            .unwrap());
        assert!(service.students().await.is_empty());

        assert!(service
            .register_student("1", "Alice", &["garbage".to_string(), textured_frame()])
            .await
            .unwrap());
        let students = service.students().await;
        assert_eq!(students["1"].face_sample_paths.len(), 1);
        assert!(students["1"].face_sample_paths[0].ends_with("face_1.jpg"));
    }

    /// Matcher whose training always fails
    struct RejectingMatcher;

    impl FaceMatcher for RejectingMatcher {
        fn train(&mut self, _label: &str, _faces: &[GrayImage]) -> Result<()> {
            Err(anyhow::anyhow!("training exploded"))
        }

        fn predict(&self, _face: &GrayImage) -> Option<Prediction> {
            None
        }

        fn label_count(&self) -> usize {
            0
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn face_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_reregistration_replaces_face_crops() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let frame = textured_frame();

        assert!(service
            .register_student("1", "Alice", &[frame.clone(), frame.clone(), frame.clone()])
            .await
            .unwrap());
        assert_eq!(
            face_files(&dir.path().join("faces/1")),
            vec!["face_0.jpg", "face_1.jpg", "face_2.jpg"]
        );

        assert!(service
            .register_student("1", "Alice", &[frame])
            .await
            .unwrap());
        assert_eq!(face_files(&dir.path().join("faces/1")), vec!["face_0.jpg"]);
        // No staging directories are left behind
        assert_eq!(face_files(&dir.path().join("faces")), vec!["1"]);
    }

    #[tokio::test]
    async fn test_failed_training_leaves_no_crops() {
        let dir = TempDir::new().unwrap();
        let store = AttendanceStore::open_with_matcher(
            dir.path(),
            RecognitionSettings::default(),
            Box::new(RejectingMatcher),
        );
        let service = AttendanceService::new(
            "attendance-test".to_string(),
            Arc::new(FramingLocator::new()),
            store,
        );

        assert!(!service
            .register_student("1", "Alice", &[textured_frame()])
            .await
            .unwrap());
        assert!(service.students().await.is_empty());
        assert!(face_files(&dir.path().join("faces")).is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_too_many_images() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let images = vec![textured_frame(); MAX_REGISTRATION_IMAGES + 1];

        assert!(!service
            .register_student("1", "Alice", &images)
            .await
            .unwrap());
        assert!(service.students().await.is_empty());
        assert!(validate_registration("1", "Alice", MAX_REGISTRATION_IMAGES).is_ok());
        assert!(validate_registration("1", "Alice", 0).is_err());
    }

    #[tokio::test]
    async fn test_register_rejects_unsafe_id() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(!service
            .register_student("../escape", "Mallory", &[textured_frame()])
            .await
            .unwrap());
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn test_mark_without_students_or_faces() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(service.mark_attendance("%%%").await.is_empty());
        assert!(service.mark_attendance(&textured_frame()).await.is_empty());
        // Frame below the minimum face size
        let tiny = encode_png(RgbImage::new(20, 20));
        assert!(service.mark_attendance(&tiny).await.is_empty());
    }

    #[tokio::test]
    async fn test_debug_frames_are_written() {
        let dir = TempDir::new().unwrap();
        let debug_dir = dir.path().join("debug");
        let store = AttendanceStore::open(&dir.path().join("data"), RecognitionSettings::default());
        let service = AttendanceService::with_debug_images(
            "attendance-test".to_string(),
            Arc::new(FramingLocator::new()),
            store,
            debug_dir.clone(),
        );

        service.mark_attendance(&textured_frame()).await;
        let written = std::fs::read_dir(&debug_dir).unwrap().count();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_readiness() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        assert!(service.is_ready().await);
        assert_eq!(service.locator_id(), "framing");

        let updated = service
            .update_settings(&UpdateSettingsRequest {
                acceptance_threshold: Some(42.5),
                duplicate_window_secs: Some(120),
            })
            .await
            .unwrap();
        assert_eq!(updated.acceptance_threshold, 42.5);
        assert_eq!(service.settings().await, updated);

        service.shutdown().await.unwrap();
        assert!(dir.path().join("settings.json").exists());
        assert!(dir.path().join("attendance.json").exists());
    }
}
