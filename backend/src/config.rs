// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Percentage of an exam drawn from questions written for the exam's own session.
pub const CURRENT_SESSION_PERCENT: usize = 70;

/// Maximum of the CBT-owned "exam" component of a subject grade.
pub const EXAM_COMPONENT_MAX: i32 = 60;

/// Maximum of the teacher-owned "test" component of a subject grade.
pub const TEST_COMPONENT_MAX: i32 = 40;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub local_store_dir: String,
    /// How long a freshly submitted exam stays hidden from the student's list.
    pub just_completed_grace_secs: i64,
    pub outbox_retry_secs: u64,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let local_store_dir = env::var("LOCAL_STORE_DIR")
            .unwrap_or_else(|_| "data/local".to_string());

        let just_completed_grace_secs = env::var("JUST_COMPLETED_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let outbox_retry_secs = env::var("OUTBOX_RETRY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            local_store_dir,
            just_completed_grace_secs,
            outbox_retry_secs,
            bind_addr,
        }
    }
}
