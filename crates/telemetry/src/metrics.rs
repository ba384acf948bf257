use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref ATTENDANCE_EVENTS_RECORDED: IntCounter = {
        let metric = IntCounter::new(
            "attendance_events_recorded_total",
            "Total number of attendance events recorded",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_DETECTIONS_REJECTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "attendance_detections_rejected_total",
                "Detections that did not produce an attendance event",
            ),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_REGISTRATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "attendance_registrations_total",
                "Student registration attempts by outcome",
            ),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_PERSIST_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "attendance_persist_failures_total",
                "Snapshot writes that failed",
            ),
            &["target"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_RECOGNITION_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "attendance_recognition_latency_seconds",
                "Time to decode, locate and match faces in one submitted frame",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_STUDENTS: IntGauge = {
        let metric = IntGauge::new("attendance_students", "Number of registered students")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}
