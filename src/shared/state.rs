use crate::channels::Transport;
use crate::coordinator::TicketCoordinator;
use crate::menu::DialogState;
use crate::shared::config::AppConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handles for the webhook handlers.
pub struct AppState {
    pub config: AppConfig,
    pub coordinator: Arc<TicketCoordinator>,
    pub transport: Arc<dyn Transport>,
    dialogs: Mutex<HashMap<i64, DialogState>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        coordinator: Arc<TicketCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            coordinator,
            transport,
            dialogs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn dialog(&self, user_id: i64) -> Option<DialogState> {
        self.dialogs.lock().await.get(&user_id).copied()
    }

    pub async fn set_dialog(&self, user_id: i64, state: DialogState) {
        self.dialogs.lock().await.insert(user_id, state);
    }

    pub async fn clear_dialog(&self, user_id: i64) {
        self.dialogs.lock().await.remove(&user_id);
    }
}
