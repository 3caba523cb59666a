use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::carousel::Carousel;
use super::window::{FeedState, SnapshotStatus};
use super::{EventStream, FaqItem, NewsItem, PulseConfig, PulseEvent, PulseSource};
use crate::error::TransportError;

/// Read-only picture of the live feed, republished after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseView {
    pub news: Vec<NewsItem>,
    pub faqs: Vec<FaqItem>,
    pub carousel: Carousel,
    pub news_status: SnapshotStatus,
    pub faq_status: SnapshotStatus,
    pub connected: bool,
}

impl PulseView {
    /// The headline the carousel is currently showing.
    pub fn current(&self) -> Option<&NewsItem> {
        self.news.get(self.carousel.index())
    }
}

#[derive(Debug)]
enum Command {
    Pause,
    Resume,
    Goto(usize),
    Next,
    Prev,
}

/// Owning handle to the live feed. Dropping it (or calling
/// [`PulseHandle::dispose`]) stops the driver and releases the push channel.
pub struct PulseHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<PulseView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PulseHandle {
    /// Start the feed: snapshot fetches, push subscription and carousel
    /// timer all run on one driver task.
    pub fn spawn(source: Arc<dyn PulseSource>, config: PulseConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = FeedState::new(config.capacity);
        let (view_tx, view) = watch::channel(render(&state, false));
        let cancel = CancellationToken::new();

        let driver = Driver {
            source,
            config,
            state,
            connected: false,
            view: view_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, cancel.clone()));

        Self {
            commands,
            view,
            cancel,
            task: Some(task),
        }
    }

    pub fn view(&self) -> PulseView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified on every republished view.
    pub fn watch(&self) -> watch::Receiver<PulseView> {
        self.view.clone()
    }

    /// Pointer or focus entered the carousel.
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Pointer or focus left the carousel.
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn goto(&self, index: usize) {
        self.send(Command::Goto(index));
    }

    pub fn next(&self) {
        self.send(Command::Next);
    }

    pub fn prev(&self) {
        self.send(Command::Prev);
    }

    /// Stop the driver and wait until the push channel has been released.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Pulse driver ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("pulse driver already stopped, command dropped");
        }
    }
}

impl Drop for PulseHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn render(state: &FeedState, connected: bool) -> PulseView {
    PulseView {
        news: state.news().to_vec(),
        faqs: state.faqs().to_vec(),
        carousel: state.carousel(),
        news_status: state.news_status(),
        faq_status: state.faq_status(),
        connected,
    }
}

/// Push-channel connection state.
enum Link<'a> {
    Connecting(BoxFuture<'a, Result<EventStream, TransportError>>),
    Open(EventStream),
    Backoff(Pin<Box<Sleep>>),
    Closed,
}

enum LinkEvent {
    Opened(Result<EventStream, TransportError>),
    Received(Option<Result<PulseEvent, TransportError>>),
    RetryDue,
}

impl Link<'_> {
    // Cancel-safe: all in-progress work lives in `self`.
    async fn next_event(&mut self) -> LinkEvent {
        match self {
            Link::Connecting(fut) => LinkEvent::Opened(fut.await),
            Link::Open(stream) => LinkEvent::Received(stream.next().await),
            Link::Backoff(sleep) => {
                sleep.await;
                LinkEvent::RetryDue
            }
            Link::Closed => std::future::pending().await,
        }
    }
}

async fn resolve<T>(fetch: &mut Option<BoxFuture<'_, T>>) -> T {
    match fetch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

struct Driver {
    source: Arc<dyn PulseSource>,
    config: PulseConfig,
    state: FeedState,
    connected: bool,
    view: watch::Sender<PulseView>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let source = self.source.clone();
        let mut news_fetch = Some(source.fetch_news());
        let mut faq_fetch = Some(source.fetch_faqs());
        let mut link = Link::Connecting(source.subscribe());
        let mut attempts = 0u32;

        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = period.as_millis() as u64, "pulse feed started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                news = resolve(&mut news_fetch) => {
                    news_fetch = None;
                    let snapshot = match news {
                        Ok(items) => {
                            info!(items = items.len(), "news snapshot loaded");
                            Some(items)
                        }
                        Err(e) => {
                            warn!("News snapshot failed: {}", e);
                            None
                        }
                    };
                    self.state.resolve_news(snapshot);
                    self.publish();
                }

                faqs = resolve(&mut faq_fetch) => {
                    faq_fetch = None;
                    let snapshot = match faqs {
                        Ok(items) => Some(items),
                        Err(e) => {
                            warn!("FAQ snapshot failed: {}", e);
                            None
                        }
                    };
                    self.state.resolve_faqs(snapshot);
                    self.publish();
                }

                event = link.next_event() => {
                    link = match event {
                        LinkEvent::Opened(Ok(stream)) => {
                            info!("pulse subscription open");
                            self.set_connected(true);
                            Link::Open(stream)
                        }
                        LinkEvent::Opened(Err(e)) => {
                            warn!("Pulse subscription failed: {}", e);
                            self.retry(&mut attempts)
                        }
                        LinkEvent::Received(Some(Ok(event))) => {
                            attempts = 0;
                            debug!(?event, "pulse event");
                            self.state.apply(event);
                            self.publish();
                            continue;
                        }
                        LinkEvent::Received(Some(Err(TransportError::Decode(e)))) => {
                            warn!("Skipping malformed pulse event: {}", e);
                            continue;
                        }
                        LinkEvent::Received(Some(Err(e))) => {
                            warn!("Pulse subscription dropped: {}", e);
                            self.set_connected(false);
                            self.retry(&mut attempts)
                        }
                        LinkEvent::Received(None) => {
                            info!("pulse subscription closed by server");
                            self.set_connected(false);
                            self.retry(&mut attempts)
                        }
                        LinkEvent::RetryDue => {
                            debug!(attempt = attempts, "re-subscribing to pulse");
                            Link::Connecting(source.subscribe())
                        }
                    };
                }

                _ = ticker.tick() => {
                    if self.state.tick() {
                        self.publish();
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(command) => self.command(command),
                        None => break,
                    }
                }
            }
        }

        // The subscription stream is dropped with `link` here, on every exit path.
        drop(link);
        info!("pulse feed stopped");
    }

    fn retry<'a>(&self, attempts: &mut u32) -> Link<'a> {
        if *attempts >= self.config.reconnect_attempts {
            warn!(attempts = *attempts, "pulse reconnect attempts exhausted");
            return Link::Closed;
        }
        let delay = self.config.backoff(*attempts);
        *attempts += 1;
        info!(attempt = *attempts, delay_ms = delay.as_millis() as u64, "pulse reconnect scheduled");
        Link::Backoff(Box::pin(tokio::time::sleep(delay)))
    }

    fn command(&mut self, command: Command) {
        let (carousel, count) = self.state.carousel_mut();
        match command {
            Command::Pause => carousel.set_paused(true),
            Command::Resume => carousel.set_paused(false),
            Command::Goto(index) => {
                if !carousel.goto(index, count) {
                    debug!(index, count, "carousel goto out of range");
                }
            }
            Command::Next => carousel.next(count),
            Command::Prev => carousel.prev(count),
        }
        self.publish();
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.publish();
        }
    }

    fn publish(&self) {
        self.view.send_replace(render(&self.state, self.connected));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use tokio::sync::oneshot;

    use super::*;

    type Push = fmpsc::UnboundedSender<Result<PulseEvent, TransportError>>;

    struct FakeSource {
        news: Mutex<Option<oneshot::Receiver<Vec<NewsItem>>>>,
        subscriptions: Mutex<VecDeque<fmpsc::UnboundedReceiver<Result<PulseEvent, TransportError>>>>,
        subscribe_calls: AtomicUsize,
    }

    impl FakeSource {
        /// Returns the source, the trigger for the news snapshot, and one
        /// push sender per scripted subscription.
        fn new(subscriptions: usize) -> (Arc<Self>, oneshot::Sender<Vec<NewsItem>>, Vec<Push>) {
            let (news_tx, news_rx) = oneshot::channel();
            let mut senders = Vec::new();
            let mut receivers = VecDeque::new();
            for _ in 0..subscriptions {
                let (tx, rx) = fmpsc::unbounded();
                senders.push(tx);
                receivers.push_back(rx);
            }
            let source = Arc::new(Self {
                news: Mutex::new(Some(news_rx)),
                subscriptions: Mutex::new(receivers),
                subscribe_calls: AtomicUsize::new(0),
            });
            (source, news_tx, senders)
        }
    }

    #[async_trait]
    impl PulseSource for FakeSource {
        async fn fetch_news(&self) -> Result<Vec<NewsItem>, TransportError> {
            let rx = self.news.lock().unwrap().take();
            match rx {
                Some(rx) => rx
                    .await
                    .map_err(|_| TransportError::Interrupted("snapshot aborted".to_string())),
                None => Ok(vec![]),
            }
        }

        async fn fetch_faqs(&self) -> Result<Vec<FaqItem>, TransportError> {
            Err(TransportError::Status {
                status: 404,
                body: String::new(),
            })
        }

        async fn subscribe(&self) -> Result<EventStream, TransportError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            match self.subscriptions.lock().unwrap().pop_front() {
                Some(rx) => Ok(rx.boxed()),
                None => Err(TransportError::Status {
                    status: 503,
                    body: String::new(),
                }),
            }
        }
    }

    fn item(title: &str) -> NewsItem {
        NewsItem {
            tag: "Legislation".to_string(),
            title: title.to_string(),
            date: "Recent".to_string(),
            summary: String::new(),
            impact: "Medium".to_string(),
            link: String::new(),
            image: None,
        }
    }

    fn titles(view: &PulseView) -> Vec<String> {
        view.news.iter().map(|n| n.title.clone()).collect()
    }

    fn config() -> PulseConfig {
        PulseConfig {
            reconnect_attempts: 2,
            ..PulseConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_during_snapshot_is_not_lost() {
        let (source, news_tx, pushes) = FakeSource::new(1);
        let handle = PulseHandle::spawn(source, config());
        let mut view = handle.watch();

        view.wait_for(|v| v.connected).await.unwrap();
        pushes[0]
            .unbounded_send(Ok(PulseEvent::NewArticle(item("live"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.view().news.is_empty());

        news_tx.send(vec![item("s0"), item("s1")]).unwrap();
        let v = view
            .wait_for(|v| v.news_status == SnapshotStatus::Loaded)
            .await
            .unwrap()
            .clone();
        assert_eq!(titles(&v), vec!["live", "s0", "s1"]);
        assert_eq!(v.faq_status, SnapshotStatus::Failed);

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_carousel_autoplay_and_pause() {
        let (source, news_tx, _pushes) = FakeSource::new(1);
        let start = Instant::now();
        let handle = PulseHandle::spawn(source, config());
        let mut view = handle.watch();

        news_tx.send(vec![item("a"), item("b"), item("c")]).unwrap();
        view.wait_for(|v| v.news.len() == 3).await.unwrap();
        assert_eq!(handle.view().carousel.index(), 0);

        view.wait_for(|v| v.carousel.index() == 1).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5000) && elapsed < Duration::from_millis(6000));

        handle.pause();
        view.wait_for(|v| v.carousel.is_paused()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(handle.view().carousel.index(), 1);

        handle.resume();
        view.wait_for(|v| v.carousel.index() == 2).await.unwrap();
        assert!(!handle.view().carousel.is_paused());

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_navigation_keeps_timer_phase() {
        let (source, news_tx, _pushes) = FakeSource::new(1);
        let start = Instant::now();
        let handle = PulseHandle::spawn(source, config());
        let mut view = handle.watch();

        news_tx.send(vec![item("a"), item("b"), item("c")]).unwrap();
        view.wait_for(|v| v.carousel.index() == 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.goto(0);
        view.wait_for(|v| v.carousel.index() == 0).await.unwrap();

        // Next autoplay step still lands on the 10 s boundary.
        view.wait_for(|v| v.carousel.index() == 1).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10_000) && elapsed < Duration::from_millis(11_000));

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_resets_carousel() {
        let (source, news_tx, pushes) = FakeSource::new(1);
        let handle = PulseHandle::spawn(source, config());
        let mut view = handle.watch();

        news_tx.send(vec![item("a"), item("b"), item("c")]).unwrap();
        view.wait_for(|v| v.carousel.index() == 2).await.unwrap();

        pushes[0]
            .unbounded_send(Ok(PulseEvent::NewArticle(item("breaking"))))
            .unwrap();
        let v = view.wait_for(|v| v.news.len() == 4).await.unwrap().clone();
        assert_eq!(v.carousel.index(), 0);
        assert_eq!(v.current().map(|n| n.title.as_str()), Some("breaking"));

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_feed_does_not_advance() {
        let (source, news_tx, _pushes) = FakeSource::new(1);
        let handle = PulseHandle::spawn(source, config());
        drop(news_tx);

        let mut view = handle.watch();
        view.wait_for(|v| v.news_status == SnapshotStatus::Failed)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let v = handle.view();
        assert_eq!(v.carousel.index(), 0);
        assert!(v.current().is_none());

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_releases_subscription() {
        let (source, news_tx, pushes) = FakeSource::new(1);
        let handle = PulseHandle::spawn(source, config());
        news_tx.send(vec![]).unwrap();
        handle.watch().wait_for(|v| v.connected).await.unwrap();

        assert!(!pushes[0].is_closed());
        handle.dispose().await;
        assert!(pushes[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_backoff_then_gives_up() {
        let (source, news_tx, pushes) = FakeSource::new(2);
        let handle = PulseHandle::spawn(source.clone(), config());
        news_tx.send(vec![]).unwrap();
        let mut view = handle.watch();
        view.wait_for(|v| v.connected).await.unwrap();

        // Server drops the first connection; the driver comes back on the second.
        let mut pushes = pushes.into_iter();
        drop(pushes.next());
        view.wait_for(|v| !v.connected).await.unwrap();
        view.wait_for(|v| v.connected).await.unwrap();
        assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 2);

        let second = pushes.next().unwrap();
        second
            .unbounded_send(Ok(PulseEvent::NewArticle(item("after reconnect"))))
            .unwrap();
        view.wait_for(|v| v.news.len() == 1).await.unwrap();

        // No more scripted subscriptions: two failed attempts, then closed.
        drop(second);
        view.wait_for(|v| !v.connected).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 4);

        handle.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_event_keeps_connection() {
        let (source, news_tx, pushes) = FakeSource::new(1);
        let handle = PulseHandle::spawn(source.clone(), config());
        news_tx.send(vec![]).unwrap();
        let mut view = handle.watch();
        view.wait_for(|v| v.connected).await.unwrap();

        let bad = serde_json::from_str::<PulseEvent>("{}").unwrap_err();
        pushes[0].unbounded_send(Err(TransportError::Decode(bad))).unwrap();
        pushes[0]
            .unbounded_send(Ok(PulseEvent::NewArticle(item("fine"))))
            .unwrap();
        view.wait_for(|v| v.news.len() == 1).await.unwrap();
        assert!(handle.view().connected);
        assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 1);

        handle.dispose().await;
    }
}
