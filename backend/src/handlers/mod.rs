// src/handlers/mod.rs

pub mod cbt;
pub mod exams;
pub mod questions;
