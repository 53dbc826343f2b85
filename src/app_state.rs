use std::sync::{Arc, Mutex, PoisonError};

use crate::{config::AppConfig, models::ChatTurn, rag::Assistant, store::RagStore};

/// Se guardan como mucho `history_turns * HISTORY_RETENTION_FACTOR` turnos.
const HISTORY_RETENTION_FACTOR: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<RagStore>,
    pub assistant: Arc<Assistant>,
    /// Historial de la conversación; sólo vive en memoria.
    pub history: Arc<Mutex<Vec<ChatTurn>>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<RagStore>, assistant: Arc<Assistant>) -> Self {
        Self {
            config,
            store,
            assistant,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn history_snapshot(&self) -> Vec<ChatTurn> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn push_turn(&self, turn: ChatTurn) {
        let capacity = self.config.history_turns.max(1) * HISTORY_RETENTION_FACTOR;
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        push_bounded(&mut history, turn, capacity);
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Añade `turn` y descarta los turnos más antiguos por encima de `capacity`.
fn push_bounded(history: &mut Vec<ChatTurn>, turn: ChatTurn, capacity: usize) {
    history.push(turn);
    if history.len() > capacity {
        let excess = history.len() - capacity;
        history.drain(..excess);
    }
}
