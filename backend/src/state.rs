// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::runner::SessionManager,
    store::{LocalStore, RemoteStore},
};

#[derive(Clone)]
pub struct AppState {
    pub remote: Arc<dyn RemoteStore>,
    pub local: Arc<dyn LocalStore>,
    pub sessions: SessionManager,
    pub config: Config,
}

impl AppState {
    pub fn new(remote: Arc<dyn RemoteStore>, local: Arc<dyn LocalStore>, config: Config) -> Self {
        let sessions = SessionManager::new(remote.clone(), local.clone());
        Self {
            remote,
            local,
            sessions,
            config,
        }
    }
}

impl FromRef<AppState> for Arc<dyn RemoteStore> {
    fn from_ref(state: &AppState) -> Self {
        state.remote.clone()
    }
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn LocalStore> {
    fn from_ref(state: &AppState) -> Self {
        state.local.clone()
    }
}
