use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWrite;

use super::Console;
use crate::pulse::window::SnapshotStatus;
use crate::pulse::{PulseHandle, PulseView};
use crate::state::AppState;

// How long to wait for the feed driver to acknowledge a command.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);

pub enum Nav {
    Next,
    Prev,
    Goto(usize),
}

/// Headlines, newest first, with the carousel position marked.
pub async fn feed<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    console.say(render_feed(&state.pulse.view())).await
}

pub async fn faq<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
) -> Result<()> {
    let view = state.pulse.view();
    if view.faqs.is_empty() {
        let note = match view.faq_status {
            SnapshotStatus::Pending => "FAQs are still loading.",
            SnapshotStatus::Failed => "Could not load FAQs.",
            SnapshotStatus::Loaded => "No questions yet.",
        };
        return console.say(note).await;
    }

    let mut output = String::from("Recent questions\n");
    for item in &view.faqs {
        output.push_str(&format!("Q: {}\nA: {}\n\n", item.q, item.a));
    }
    console.say(output).await
}

/// Move the carousel and show where it landed.
pub async fn navigate<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    nav: Nav,
) -> Result<()> {
    let view = acknowledged(state, |pulse| match nav {
        Nav::Next => pulse.next(),
        Nav::Prev => pulse.prev(),
        Nav::Goto(i) => pulse.goto(i),
    })
    .await;

    match view.current() {
        Some(item) => {
            console
                .say(format!(
                    "[{}/{}] {} ({}, {})\n{}",
                    view.carousel.index() + 1,
                    view.news.len(),
                    item.title,
                    item.tag,
                    item.date,
                    item.summary
                ))
                .await
        }
        None => console.say("No headlines to show.").await,
    }
}

/// Hold (`true`) or release (`false`) the carousel autoplay.
pub async fn hold<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    paused: bool,
) -> Result<()> {
    let view = acknowledged(state, |pulse| {
        if paused {
            pulse.pause()
        } else {
            pulse.resume()
        }
    })
    .await;
    let note = if view.carousel.is_paused() {
        "Carousel paused."
    } else {
        "Carousel playing."
    };
    console.say(note).await
}

async fn acknowledged(
    state: &AppState,
    action: impl FnOnce(&PulseHandle),
) -> PulseView {
    let mut watch = state.pulse.watch();
    watch.borrow_and_update();
    action(&state.pulse);
    // Whatever happens, show the latest view.
    let _ = tokio::time::timeout(ACK_TIMEOUT, watch.changed()).await;
    let view = watch.borrow().clone();
    view
}

fn render_feed(view: &PulseView) -> String {
    if view.news.is_empty() {
        return match view.news_status {
            SnapshotStatus::Pending => "Headlines are still loading.".to_string(),
            SnapshotStatus::Failed => "Could not load headlines.".to_string(),
            SnapshotStatus::Loaded => "No headlines yet.".to_string(),
        };
    }

    let mut output = format!(
        "Legal pulse ({}{})\n",
        if view.connected { "live" } else { "offline" },
        if view.carousel.is_paused() { ", paused" } else { "" }
    );
    for (i, item) in view.news.iter().enumerate() {
        let marker = if i == view.carousel.index() { '>' } else { ' ' };
        output.push_str(&format!(
            "{} {:>2}. [{}] {} ({}, impact {})\n",
            marker, i, item.tag, item.title, item.date, item.impact
        ));
    }
    output
}
