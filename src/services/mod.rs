pub mod access_validator;
pub mod audit_service;
pub mod grading_service;
pub mod integrity_monitor;
pub mod result_gate;
pub mod session_guard;
pub mod staff_service;
pub mod submission_service;
pub mod timing_guard;

#[cfg(test)]
pub mod fixtures;
