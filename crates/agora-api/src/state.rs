//! Application state shared across handlers

use std::sync::Arc;

use agora_tasks::TaskServer;

#[derive(Clone)]
pub struct AppState {
    /// Task server hosting every local agent
    pub server: Arc<TaskServer>,
}

impl AppState {
    pub fn new(server: Arc<TaskServer>) -> Self {
        Self { server }
    }
}
