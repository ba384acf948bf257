pub mod attendance;
pub mod snapshot;
pub mod validation;
