// src/services/mod.rs

pub mod grading;
pub mod guard;
pub mod listing;
pub mod outbox;
pub mod runner;
pub mod scheduler;
pub mod selector;
pub mod session;
