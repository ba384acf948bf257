//! Attendance contracts shared by the attendance service and its clients.
//!
//! This module defines the persisted records (students and attendance events),
//! the dashboard aggregate, and the JSON envelopes used on the HTTP surface.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    /// Unique student identifier (also the recognizer label). Older
    /// directories only carry it as the map key.
    #[serde(default)]
    pub student_id: String,

    /// Display name
    pub name: String,

    /// Date of the most recent (re-)registration
    pub registration_date: NaiveDate,

    /// Normalised face crops saved at registration time, in sample order
    #[serde(default, alias = "face_images")]
    pub face_sample_paths: Vec<String>,
}

/// Student directory keyed by student id
pub type StudentDirectory = BTreeMap<String, Student>;

/// Attendance status. Only presence is ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttendanceStatus {
    #[default]
    Present,
}

/// One attendance mark produced by a successful recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub student_id: String,

    /// Copy of the student's name at the time of marking
    pub name: String,

    pub date: NaiveDate,

    pub time: NaiveTime,

    #[serde(default)]
    pub status: AttendanceStatus,

    /// Recognizer distance (lower is a better match)
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl AttendanceEvent {
    /// Combined timestamp used for ordering and the duplicate window
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Attendance count for a single day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Dashboard aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: usize,

    pub today_attendance: usize,

    /// Percentage of students marked today, rounded to one decimal
    pub attendance_rate: f64,

    /// Today first, then the six preceding days
    #[serde(rename = "last7Days")]
    pub last_7_days: Vec<DayCount>,

    /// Five most recent events, newest first
    pub recent_activity: Vec<AttendanceEvent>,
}

/// Runtime recognition settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionSettings {
    /// Distances at or above this value are rejected
    pub acceptance_threshold: f64,

    /// Second detection of the same student inside this window is dropped
    pub duplicate_window_secs: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            duplicate_window_secs: default_duplicate_window_secs(),
        }
    }
}

pub fn default_acceptance_threshold() -> f64 {
    100.0
}

pub fn default_duplicate_window_secs() -> u64 {
    60
}

/// Request body for `POST /api/mark-attendance`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkAttendanceRequest {
    /// Base64 image, optionally wrapped in a data URL
    #[serde(default)]
    pub image: String,
}

/// Request body for `POST /api/register-student`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterStudentRequest {
    #[serde(default)]
    pub student_id: String,

    #[serde(default)]
    pub name: String,

    /// Base64 images, optionally wrapped in data URLs
    #[serde(default)]
    pub images: Vec<String>,
}

/// Request body for `POST /api/settings`. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub acceptance_threshold: Option<f64>,

    #[serde(default)]
    pub duplicate_window_secs: Option<u64>,
}

/// Envelope for every `/api` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}
