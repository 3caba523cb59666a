use std::collections::HashMap;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Console;
use crate::chat::{ChatEvent, ChatMessage, Role, SessionState};
use crate::error::ChatError;
use crate::state::AppState;

/// Ask a question; the answer streams in through the printer.
pub async fn ask<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    question: &str,
) -> Result<()> {
    if state.chat.state() != SessionState::Idle {
        console
            .say("Still answering the previous question. Try again when it finishes.")
            .await?;
        return Ok(());
    }

    let mode = state.settings.read().await.mode;
    let context = state.context_summary();
    let chat = state.chat.clone();
    let question = question.to_string();
    info!(%mode, context_len = context.len(), "question sent");

    tokio::spawn(async move {
        match chat.send(&question, mode, &context).await {
            Ok(outcome) => debug!(?outcome, "exchange finished"),
            Err(ChatError::Disposed) => debug!("exchange abandoned"),
            Err(e) => warn!("Question not sent: {}", e),
        }
    });
    Ok(())
}

/// One-shot question without streaming.
pub async fn quick<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    question: &str,
) -> Result<()> {
    if state.chat.state() != SessionState::Idle {
        console
            .say("Still answering the previous question. Try again when it finishes.")
            .await?;
        return Ok(());
    }

    let chat = state.chat.clone();
    let question = question.to_string();
    tokio::spawn(async move {
        match chat.ask(&question).await {
            Ok(outcome) => debug!(?outcome, "quick answer finished"),
            Err(ChatError::Disposed) => debug!("quick answer abandoned"),
            Err(e) => warn!("Question not sent: {}", e),
        }
    });
    Ok(())
}

pub async fn history<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let snapshot = state.chat.snapshot();
    let mut output = String::new();
    for message in &snapshot.messages {
        output.push_str(&format!(
            "[{}] {}: {}\n",
            message.timestamp.format("%Y-%m-%d %H:%M"),
            label(message.role),
            message.content
        ));
    }
    if snapshot.active_stream.is_some() {
        output.push_str("(answer still streaming)\n");
    }
    console.say(output).await
}

pub async fn clear<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    match state.chat.clear() {
        Ok(()) => Ok(()),
        Err(ChatError::Busy) => {
            console
                .say("Can't clear while an answer is streaming.")
                .await
        }
        Err(e) => console.say(format!("Can't clear: {}", e)).await,
    }
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

/// Print chat events to `out` as they arrive, streaming answers in place.
pub fn spawn_printer<W>(mut events: mpsc::UnboundedReceiver<ChatEvent>, mut out: W) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut transcript = Transcript::default();
        while let Some(event) = events.recv().await {
            let Some(text) = transcript.render(&event) else {
                continue;
            };
            if let Err(e) = write(&mut out, &text).await {
                warn!("Chat printer stopped: {}", e);
                break;
            }
        }
        debug!("chat printer finished");
    })
}

async fn write<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

/// Turns the event stream into terminal text: a streamed message is printed
/// once and then extended by the newly arrived suffix only.
#[derive(Default)]
struct Transcript {
    printed: HashMap<String, String>,
    line_open: bool,
}

impl Transcript {
    fn render(&mut self, event: &ChatEvent) -> Option<String> {
        match event {
            ChatEvent::MessageAppended(message) => match message.role {
                // Already on screen: the user typed it.
                Role::User => None,
                _ => Some(self.open(message)),
            },
            ChatEvent::ContentUpdated { id, content } => {
                let previous = self.printed.insert(id.clone(), content.clone());
                self.line_open = true;
                match previous.as_deref().and_then(|p| content.strip_prefix(p)) {
                    Some("") => None,
                    Some(delta) => Some(delta.to_string()),
                    // Replaced rather than extended.
                    None => Some(format!("\n{}", content)),
                }
            }
            ChatEvent::StateChanged(SessionState::Idle) if self.line_open => {
                self.line_open = false;
                Some("\n".to_string())
            }
            ChatEvent::StateChanged(_) => None,
            ChatEvent::Reset(messages) => {
                self.printed.clear();
                let mut text = String::new();
                if self.line_open {
                    text.push('\n');
                    self.line_open = false;
                }
                for message in messages {
                    text.push_str(&self.open(message));
                    text.push('\n');
                    self.line_open = false;
                }
                Some(text)
            }
        }
    }

    fn open(&mut self, message: &ChatMessage) -> String {
        self.printed.insert(message.id.clone(), message.content.clone());
        let mut text = String::new();
        if self.line_open {
            text.push('\n');
        }
        text.push_str(&format!("{}> {}", label(message.role), message.content));
        self.line_open = true;
        text
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn message(id: &str, role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn updated(id: &str, content: &str) -> ChatEvent {
        ChatEvent::ContentUpdated {
            id: id.to_string(),
            content: content.to_string(),
        }
    }

    fn render_all(events: Vec<ChatEvent>) -> String {
        let mut transcript = Transcript::default();
        events
            .iter()
            .filter_map(|e| transcript.render(e))
            .collect()
    }

    #[test]
    fn test_streamed_answer_prints_suffixes() {
        let out = render_all(vec![
            ChatEvent::MessageAppended(message("u1", Role::User, "Is it fair?")),
            ChatEvent::StateChanged(SessionState::Sending),
            ChatEvent::StateChanged(SessionState::StreamingResponse),
            ChatEvent::MessageAppended(message("a1", Role::Assistant, "")),
            updated("a1", "The "),
            updated("a1", "The contract "),
            updated("a1", "The contract is fair."),
            ChatEvent::StateChanged(SessionState::Idle),
        ]);
        assert_eq!(out, "assistant> The contract is fair.\n");
    }

    #[test]
    fn test_overwritten_placeholder_prints_whole_notice() {
        let out = render_all(vec![
            ChatEvent::MessageAppended(message("a1", Role::Assistant, "")),
            updated("a1", "Hmm"),
            updated("a1", "Sorry, no connection."),
            ChatEvent::StateChanged(SessionState::Error),
            ChatEvent::StateChanged(SessionState::Idle),
        ]);
        assert_eq!(out, "assistant> Hmm\nSorry, no connection.\n");
    }

    #[test]
    fn test_reset_prints_fresh_log() {
        let out = render_all(vec![ChatEvent::Reset(vec![message(
            "s1",
            Role::System,
            "Chat cleared.",
        )])]);
        assert_eq!(out, "system> Chat cleared.\n");
    }

    #[tokio::test]
    async fn test_printer_writes_until_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (client, mut server) = tokio::io::duplex(1024);
        let printer = spawn_printer(rx, client);

        tx.send(ChatEvent::MessageAppended(message("a1", Role::Assistant, "Void.")))
            .unwrap();
        tx.send(ChatEvent::StateChanged(SessionState::Idle)).unwrap();
        drop(tx);
        printer.await.unwrap();

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, "assistant> Void.\n");
    }
}
