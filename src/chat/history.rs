use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::ChatMessage;

/// Durable home for the conversation log.
///
/// Implementations store the whole ordered message list under one record.
/// Both calls may block on disk; async code goes through [`HistoryWriter`].
pub trait HistoryStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<ChatMessage>>>;

    fn save(&self, messages: &[ChatMessage]) -> Result<()>;
}

#[derive(Default)]
struct Pending {
    generation: u64,
    messages: Vec<ChatMessage>,
}

/// Saves log snapshots on the blocking pool, one write at a time and in
/// submission order. Snapshots submitted while a write is running collapse
/// into the newest one.
pub struct HistoryWriter {
    pending: watch::Sender<Pending>,
    saved: watch::Receiver<u64>,
}

impl HistoryWriter {
    /// Start the writer task. Must be called inside a tokio runtime; the task
    /// ends once the writer is dropped and the last snapshot is written.
    pub fn spawn(store: Arc<dyn HistoryStore>) -> Self {
        let (pending, rx) = watch::channel(Pending::default());
        let (saved_tx, saved) = watch::channel(0u64);
        tokio::spawn(write_loop(store, rx, saved_tx));
        Self { pending, saved }
    }

    /// Queue `messages` as the next state to store. Never blocks.
    pub fn submit(&self, messages: Vec<ChatMessage>) {
        self.pending.send_modify(|pending| {
            pending.generation += 1;
            pending.messages = messages;
        });
    }

    /// Wait until everything submitted so far is on disk (or has failed).
    pub async fn flush(&self) {
        let target = self.pending.borrow().generation;
        let mut saved = self.saved.clone();
        // Err only if the writer task is gone, so nothing more can land.
        let _ = saved.wait_for(|generation| *generation >= target).await;
    }
}

async fn write_loop(
    store: Arc<dyn HistoryStore>,
    mut rx: watch::Receiver<Pending>,
    saved: watch::Sender<u64>,
) {
    while rx.changed().await.is_ok() {
        let (generation, messages) = {
            let pending = rx.borrow_and_update();
            (pending.generation, pending.messages.clone())
        };

        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&messages)).await {
            Ok(Ok(())) => debug!(generation, "chat history saved"),
            Ok(Err(e)) => warn!("Failed to persist chat history: {:#}", e),
            Err(e) => warn!("History write task failed: {}", e),
        }
        saved.send_replace(generation);
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};

    use super::*;

    /// Keeps the serialized record in memory so tests exercise the same
    /// JSON round-trip as the file store.
    #[derive(Default)]
    pub struct MemoryHistory {
        record: Mutex<Option<String>>,
        fail_saves: bool,
        saves: AtomicUsize,
        // While `true`, saves wait on `gate_cv`.
        held: Mutex<bool>,
        gate_cv: Condvar,
        entered: tokio::sync::Notify,
    }

    impl MemoryHistory {
        pub fn raw(&self) -> Option<String> {
            self.record.lock().unwrap().clone()
        }

        pub fn failing() -> Self {
            Self {
                fail_saves: true,
                ..Self::default()
            }
        }

        pub fn with_raw(raw: &str) -> Self {
            Self {
                record: Mutex::new(Some(raw.to_string())),
                ..Self::default()
            }
        }

        /// Saves started so far.
        pub fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        /// Make every save block until [`release`](Self::release).
        pub fn hold(&self) {
            *self.held.lock().unwrap() = true;
        }

        pub fn release(&self) {
            *self.held.lock().unwrap() = false;
            self.gate_cv.notify_all();
        }

        /// Resolves once a save has started.
        pub async fn save_started(&self) {
            self.entered.notified().await;
        }
    }

    impl HistoryStore for MemoryHistory {
        fn load(&self) -> Result<Option<Vec<ChatMessage>>> {
            match self.record.lock().unwrap().as_deref() {
                Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
                None => Ok(None),
            }
        }

        fn save(&self, messages: &[ChatMessage]) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let mut held = self.held.lock().unwrap();
            while *held {
                held = self.gate_cv.wait(held).unwrap();
            }
            drop(held);

            if self.fail_saves {
                anyhow::bail!("disk full");
            }
            *self.record.lock().unwrap() = Some(serde_json::to_string(messages)?);
            Ok(())
        }
    }
}
