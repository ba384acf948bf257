//! Face-recognition attendance service.
//!
//! The HTTP service lives in `attendance-service`; shared records and
//! persistence helpers in `common`; logging and metrics in `telemetry`.

pub use attendance_service;
pub use common;
pub use telemetry;
