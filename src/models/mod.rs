pub mod audit_log;
pub mod exam;
pub mod question;
pub mod submission;
