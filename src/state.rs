use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::analysis::types::AnalysisResult;
use crate::analysis::RedlineBoard;
use crate::api::ApiClient;
use crate::chat::{ChatMode, ChatSession};
use crate::pulse::{PulseConfig, PulseHandle};
use crate::storage::{LocalStore, ANALYSIS_KEY};

/// Runtime-adjustable chat parameters.
pub struct ChatSettings {
    pub mode: ChatMode,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            mode: ChatMode::Professional,
        }
    }
}

impl ChatSettings {
    pub fn from_env() -> Self {
        let mode = match dotenv::var("CHAT_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring CHAT_MODE: {:#}", e);
                ChatMode::default()
            }),
            Err(_) => ChatMode::default(),
        };
        Self { mode }
    }
}

pub struct AppState {
    pub api: Arc<ApiClient>,
    pub store: Arc<LocalStore>,
    pub chat: Arc<ChatSession>,
    pub pulse: PulseHandle,
    pub settings: Arc<RwLock<ChatSettings>>,
    board: Mutex<Option<RedlineBoard>>,
}

impl AppState {
    /// Wire up the session: restores chat history and the last analysis,
    /// then starts the live feed.
    pub fn new(
        api: Arc<ApiClient>,
        store: Arc<LocalStore>,
        pulse: PulseConfig,
        settings: ChatSettings,
    ) -> Self {
        let chat = Arc::new(ChatSession::restore(api.clone(), store.clone()));

        let board = match store.get::<AnalysisResult>(ANALYSIS_KEY) {
            Ok(Some(analysis)) => Some(RedlineBoard::new(Arc::new(analysis.normalized()))),
            Ok(None) => None,
            Err(e) => {
                warn!("Stored analysis unreadable, ignoring: {:#}", e);
                None
            }
        };

        let pulse = PulseHandle::spawn(api.clone(), pulse);

        Self {
            api,
            store,
            chat,
            pulse,
            settings: Arc::new(RwLock::new(settings)),
            board: Mutex::new(board),
        }
    }

    /// The current analysis with its redlines, if a contract was uploaded.
    pub fn board(&self) -> MutexGuard<'_, Option<RedlineBoard>> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a freshly uploaded analysis. Any applied redlines belonged to
    /// the previous contract and are dropped. Returns the starting score.
    pub fn accept_analysis(&self, analysis: AnalysisResult) -> Result<u32> {
        let analysis = Arc::new(analysis.normalized());
        self.store.put(ANALYSIS_KEY, analysis.as_ref())?;

        let mut board = self.board();
        let score = match board.as_mut() {
            Some(existing) => existing.replace_analysis(analysis),
            None => {
                let fresh = RedlineBoard::new(analysis);
                let score = fresh.score();
                *board = Some(fresh);
                score
            }
        };
        Ok(score)
    }

    /// Forget the uploaded contract locally.
    pub fn forget_analysis(&self) -> Result<()> {
        self.board().take();
        self.store.remove(ANALYSIS_KEY)?;
        info!("analysis forgotten");
        Ok(())
    }

    /// Context sent along with streamed questions.
    pub fn context_summary(&self) -> String {
        self.board()
            .as_ref()
            .map(|board| board.analysis().context_summary())
            .unwrap_or_default()
    }

    pub async fn dispose(self) {
        self.chat.dispose();
        self.chat.flush().await;
        self.pulse.dispose().await;
        info!("session closed");
    }
}
