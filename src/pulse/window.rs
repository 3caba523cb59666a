use std::collections::VecDeque;

use tracing::debug;

use super::carousel::Carousel;
use super::{FaqItem, NewsItem, PulseEvent};

/// Bounded, most-recent-first buffer.
#[derive(Debug, Clone)]
pub struct FeedWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> FeedWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the contents with a snapshot (already newest-first).
    pub fn replace(&mut self, items: Vec<T>) {
        self.items = items.into_iter().take(self.capacity).collect();
    }

    /// Add the newest item, evicting the oldest beyond capacity.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Where an initial snapshot fetch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Pending,
    Loaded,
    Failed,
}

// Pushes that arrive before their channel's snapshot resolves wait here,
// oldest first. Only the newest `capacity` of them can ever be shown.
struct Channel<T> {
    window: FeedWindow<T>,
    status: SnapshotStatus,
    buffered: VecDeque<T>,
}

impl<T: Clone> Channel<T> {
    fn new(capacity: usize) -> Self {
        Self {
            window: FeedWindow::new(capacity),
            status: SnapshotStatus::Pending,
            buffered: VecDeque::new(),
        }
    }

    // Returns true if the item is visible now.
    fn push(&mut self, item: T) -> bool {
        if self.status == SnapshotStatus::Pending {
            self.buffered.push_back(item);
            if self.buffered.len() > self.window.capacity {
                self.buffered.pop_front();
            }
            false
        } else {
            self.window.push_front(item);
            true
        }
    }

    // Returns true if buffered pushes were merged on top of the snapshot.
    fn resolve(&mut self, snapshot: Option<Vec<T>>) -> bool {
        match snapshot {
            Some(items) => {
                self.window.replace(items);
                self.status = SnapshotStatus::Loaded;
            }
            None => self.status = SnapshotStatus::Failed,
        }
        let buffered = std::mem::take(&mut self.buffered);
        let merged = !buffered.is_empty();
        for item in buffered {
            self.window.push_front(item);
        }
        merged
    }
}

/// Live feed state: the news window (driving the carousel) and the FAQ
/// window, each fed by one snapshot plus push events.
pub struct FeedState {
    news: Channel<NewsItem>,
    faqs: Channel<FaqItem>,
    carousel: Carousel,
}

impl FeedState {
    pub fn new(capacity: usize) -> Self {
        Self {
            news: Channel::new(capacity),
            faqs: Channel::new(capacity),
            carousel: Carousel::default(),
        }
    }

    /// Land the news snapshot (`None` = fetch failed).
    pub fn resolve_news(&mut self, snapshot: Option<Vec<NewsItem>>) {
        let merged = self.news.resolve(snapshot);
        if merged {
            self.carousel.surface_newest();
        } else {
            self.carousel.clamp(self.news.window.len());
        }
        debug!(
            items = self.news.window.len(),
            status = ?self.news.status,
            merged,
            "news snapshot resolved"
        );
    }

    /// Land the FAQ snapshot (`None` = fetch failed).
    pub fn resolve_faqs(&mut self, snapshot: Option<Vec<FaqItem>>) {
        self.faqs.resolve(snapshot);
    }

    /// Apply one push event. No deduplication: an item pushed twice shows
    /// up twice.
    pub fn apply(&mut self, event: PulseEvent) {
        match event {
            PulseEvent::NewArticle(item) => {
                if self.news.push(item) {
                    self.carousel.surface_newest();
                }
            }
            PulseEvent::NewFaq(item) => {
                self.faqs.push(item);
            }
        }
    }

    pub fn tick(&mut self) -> bool {
        self.carousel.tick(self.news.window.len())
    }

    pub fn carousel_mut(&mut self) -> (&mut Carousel, usize) {
        (&mut self.carousel, self.news.window.len())
    }

    pub fn carousel(&self) -> Carousel {
        self.carousel
    }

    pub fn news(&self) -> &FeedWindow<NewsItem> {
        &self.news.window
    }

    pub fn faqs(&self) -> &FeedWindow<FaqItem> {
        &self.faqs.window
    }

    pub fn news_status(&self) -> SnapshotStatus {
        self.news.status
    }

    pub fn faq_status(&self) -> SnapshotStatus {
        self.faqs.status
    }
}
