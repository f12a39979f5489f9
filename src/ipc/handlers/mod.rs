pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod schedule;
pub mod setup;
pub mod syllabus;
