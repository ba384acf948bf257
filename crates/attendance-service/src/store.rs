//! Student directory and attendance log with duplicate suppression.
//!
//! The store owns both collections and the face matcher. Every mutation
//! rewrites the affected snapshot in full; write failures are logged and the
//! in-memory state stays authoritative until the next successful write.

use crate::vision::{augment, lbph::LbphMatcher, FaceMatcher, Prediction};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use common::attendance::{
    AttendanceEvent, AttendanceStatus, DashboardStats, DayCount, RecognitionSettings, Student,
    StudentDirectory, UpdateSettingsRequest,
};
use common::snapshot;
use common::validation::{
    validate_id, validate_name, validate_range, validate_threshold, MAX_DUPLICATE_WINDOW_SECS,
};
use image::GrayImage;
use std::path::{Path, PathBuf};
use telemetry::metrics::{
    ATTENDANCE_DETECTIONS_REJECTED, ATTENDANCE_EVENTS_RECORDED, ATTENDANCE_PERSIST_FAILURES,
    ATTENDANCE_REGISTRATIONS, ATTENDANCE_STUDENTS,
};
use tracing::{debug, error, info, warn};

/// Number of events in the dashboard's recent activity list
const RECENT_ACTIVITY_LEN: usize = 5;

/// Days covered by the dashboard histogram
const HISTOGRAM_DAYS: u64 = 7;

/// Files owned by the store under the data directory
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub students: PathBuf,
    pub attendance: PathBuf,
    pub model: PathBuf,
    pub settings: PathBuf,
    pub faces: PathBuf,
}

impl StorePaths {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            students: data_dir.join("students.json"),
            attendance: data_dir.join("attendance.json"),
            model: data_dir.join("trainer.json"),
            settings: data_dir.join("settings.json"),
            faces: data_dir.join("faces"),
        }
    }

    /// Directory holding the saved face crops of one student
    pub fn face_dir(&self, student_id: &str) -> PathBuf {
        self.faces.join(student_id)
    }
}

/// One matcher output as seen by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Recognizer distance; lower is better
    pub confidence: f64,
}

impl From<Prediction> for Detection {
    fn from(prediction: Prediction) -> Self {
        Self {
            label: prediction.label,
            confidence: prediction.distance,
        }
    }
}

/// A normalised registration face and where its crop was saved
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub face: GrayImage,
    pub saved_path: Option<String>,
}

pub struct AttendanceStore {
    paths: StorePaths,
    students: StudentDirectory,
    events: Vec<AttendanceEvent>,
    settings: RecognitionSettings,
    matcher: Box<dyn FaceMatcher>,
}

impl AttendanceStore {
    /// Load the store from `data_dir` with the LBPH matcher. Stored settings
    /// take precedence over `defaults`.
    pub fn open(data_dir: &Path, defaults: RecognitionSettings) -> Self {
        let paths = StorePaths::new(data_dir);
        let matcher = LbphMatcher::load_or_default(&paths.model);
        Self::open_with_matcher(data_dir, defaults, Box::new(matcher))
    }

    /// Load the store from `data_dir` around an already constructed matcher
    pub fn open_with_matcher(
        data_dir: &Path,
        defaults: RecognitionSettings,
        matcher: Box<dyn FaceMatcher>,
    ) -> Self {
        let paths = StorePaths::new(data_dir);

        let mut students: StudentDirectory = snapshot::read_json_or_default(&paths.students);
        for (id, student) in students.iter_mut() {
            if student.student_id.is_empty() {
                student.student_id = id.clone();
            }
        }
        let events: Vec<AttendanceEvent> = snapshot::read_json_or_default(&paths.attendance);
        let settings = match snapshot::read_json::<RecognitionSettings>(&paths.settings) {
            Ok(Some(stored)) => stored,
            Ok(None) => defaults,
            Err(e) => {
                error!("Failed to load settings, using defaults: {:#}", e);
                defaults
            }
        };

        info!(
            students = students.len(),
            events = events.len(),
            trained_labels = matcher.label_count(),
            acceptance_threshold = settings.acceptance_threshold,
            duplicate_window_secs = settings.duplicate_window_secs,
            data_dir = %data_dir.display(),
            "Attendance store loaded"
        );
        ATTENDANCE_STUDENTS.set(students.len() as i64);

        Self {
            paths,
            students,
            events,
            settings,
            matcher,
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn students(&self) -> &StudentDirectory {
        &self.students
    }

    pub fn settings(&self) -> RecognitionSettings {
        self.settings
    }

    /// Ask the matcher who `face` is
    pub fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        self.matcher.predict(face)
    }

    /// Train the matcher on `samples` and (re)register the student.
    ///
    /// Returns `false` without touching the directory when the input is
    /// invalid, no face was found in any sample, or training fails.
    pub fn register(
        &mut self,
        student_id: &str,
        name: &str,
        samples: Vec<FaceSample>,
        today: NaiveDate,
    ) -> bool {
        if let Err(e) = validate_id(student_id, "student_id").and_then(|_| validate_name(name, "name")) {
            warn!("Rejected registration: {:#}", e);
            ATTENDANCE_REGISTRATIONS.with_label_values(&["invalid"]).inc();
            return false;
        }

        if samples.is_empty() {
            warn!(student_id, "No valid face images detected");
            ATTENDANCE_REGISTRATIONS.with_label_values(&["no_face"]).inc();
            return false;
        }

        let training: Vec<GrayImage> = samples
            .iter()
            .flat_map(|sample| augment::variations(&sample.face))
            .collect();

        info!(student_id, variations = training.len(), "Training with face variations");
        if let Err(e) = self.matcher.train(student_id, &training) {
            error!(student_id, "Training failed: {:#}", e);
            ATTENDANCE_REGISTRATIONS
                .with_label_values(&["training_failed"])
                .inc();
            return false;
        }
        self.persist_model();

        let student = Student {
            student_id: student_id.to_string(),
            name: name.to_string(),
            registration_date: today,
            face_sample_paths: samples.into_iter().filter_map(|s| s.saved_path).collect(),
        };
        self.students.insert(student_id.to_string(), student);
        self.persist_students();

        ATTENDANCE_REGISTRATIONS.with_label_values(&["success"]).inc();
        ATTENDANCE_STUDENTS.set(self.students.len() as i64);
        info!(student_id, name, "Successfully registered student");
        true
    }

    /// Record attendance for `detections` at `now`; returns the new events
    pub fn record_attendance_at(
        &mut self,
        detections: &[Detection],
        now: NaiveDateTime,
    ) -> Vec<AttendanceEvent> {
        let mut created = Vec::new();

        for detection in detections {
            // NaN compares false against everything, so reject it explicitly
            if detection.confidence.is_nan()
                || detection.confidence >= self.settings.acceptance_threshold
            {
                info!(
                    label = %detection.label,
                    confidence = detection.confidence,
                    threshold = self.settings.acceptance_threshold,
                    "Confidence too low"
                );
                ATTENDANCE_DETECTIONS_REJECTED
                    .with_label_values(&["low_confidence"])
                    .inc();
                continue;
            }

            let Some(student) = self.students.get(&detection.label) else {
                info!(label = %detection.label, "No student found with ID");
                ATTENDANCE_DETECTIONS_REJECTED
                    .with_label_values(&["unknown_label"])
                    .inc();
                continue;
            };

            if self.has_recent_event(&detection.label, now) {
                info!(student_id = %detection.label, name = %student.name, "Skipped duplicate mark");
                ATTENDANCE_DETECTIONS_REJECTED
                    .with_label_values(&["duplicate"])
                    .inc();
                continue;
            }

            let event = AttendanceEvent {
                student_id: detection.label.clone(),
                name: student.name.clone(),
                date: now.date(),
                time: now.time(),
                status: AttendanceStatus::Present,
                confidence: Some(detection.confidence),
            };

            info!(
                student_id = %event.student_id,
                name = %event.name,
                confidence = detection.confidence,
                "Marked attendance"
            );
            self.events.push(event.clone());
            ATTENDANCE_EVENTS_RECORDED.inc();
            self.persist_attendance();
            created.push(event);
        }

        created
    }

    /// Record attendance at the current local time
    pub fn record_attendance(&mut self, detections: &[Detection]) -> Vec<AttendanceEvent> {
        self.record_attendance_at(detections, common::validation::local_now())
    }

    fn has_recent_event(&self, student_id: &str, now: NaiveDateTime) -> bool {
        let window = TimeDelta::seconds(self.settings.duplicate_window_secs as i64);
        self.events.iter().any(|event| {
            event.student_id == student_id && (now - event.timestamp()).abs() < window
        })
    }

    /// All events, newest first
    pub fn list_attendance(&self) -> Vec<AttendanceEvent> {
        let mut events = self.events.clone();
        events.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        events
    }

    /// Dashboard aggregate relative to `today`
    pub fn dashboard_stats(&self, today: NaiveDate) -> DashboardStats {
        let total_students = self.students.len();
        let count_on = |date: NaiveDate| self.events.iter().filter(|e| e.date == date).count();

        let today_attendance = count_on(today);
        let attendance_rate = if total_students > 0 {
            let rate = today_attendance as f64 / total_students as f64 * 100.0;
            (rate * 10.0).round() / 10.0
        } else {
            0.0
        };

        let last_7_days = (0..HISTOGRAM_DAYS)
            .filter_map(|offset| today.checked_sub_days(chrono::Days::new(offset)))
            .map(|date| DayCount {
                date,
                count: count_on(date),
            })
            .collect();

        let mut recent_activity = self.list_attendance();
        recent_activity.truncate(RECENT_ACTIVITY_LEN);

        DashboardStats {
            total_students,
            today_attendance,
            attendance_rate,
            last_7_days,
            recent_activity,
        }
    }

    /// Apply a partial settings update and persist it
    pub fn update_settings(&mut self, update: &UpdateSettingsRequest) -> Result<RecognitionSettings> {
        let mut next = self.settings;
        if let Some(threshold) = update.acceptance_threshold {
            validate_threshold(threshold, "acceptanceThreshold")?;
            next.acceptance_threshold = threshold;
        }
        if let Some(window) = update.duplicate_window_secs {
            validate_range(window, 0, MAX_DUPLICATE_WINDOW_SECS, "duplicateWindowSecs")?;
            next.duplicate_window_secs = window;
        }

        self.settings = next;
        info!(
            acceptance_threshold = next.acceptance_threshold,
            duplicate_window_secs = next.duplicate_window_secs,
            "Recognition settings updated"
        );
        self.persist_settings();
        Ok(next)
    }

    /// Write every snapshot
    pub fn persist_all(&self) {
        self.persist_students();
        self.persist_attendance();
        self.persist_model();
    }

    fn persist_students(&self) {
        if let Err(e) = snapshot::write_json(&self.paths.students, &self.students) {
            error!("Error saving students: {:#}", e);
            ATTENDANCE_PERSIST_FAILURES
                .with_label_values(&["students"])
                .inc();
        }
    }

    fn persist_attendance(&self) {
        if let Err(e) = snapshot::write_json(&self.paths.attendance, &self.events) {
            error!("Error saving attendance: {:#}", e);
            ATTENDANCE_PERSIST_FAILURES
                .with_label_values(&["attendance"])
                .inc();
        }
    }

    fn persist_model(&self) {
        if let Err(e) = self.matcher.save(&self.paths.model) {
            error!("Error saving recognizer model: {:#}", e);
            ATTENDANCE_PERSIST_FAILURES.with_label_values(&["model"]).inc();
        } else {
            debug!(labels = self.matcher.label_count(), "Saved recognizer model");
        }
    }

    fn persist_settings(&self) {
        if let Err(e) = snapshot::write_json(&self.paths.settings, &self.settings) {
            error!("Error saving settings: {:#}", e);
            ATTENDANCE_PERSIST_FAILURES
                .with_label_values(&["settings"])
                .inc();
        }
    }
}
