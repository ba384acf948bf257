pub mod api;
pub mod config;
pub mod error;
pub mod state;
pub mod store;
pub mod vision;

pub use config::AttendanceConfig;
pub use state::AttendanceService;
pub use store::AttendanceStore;
