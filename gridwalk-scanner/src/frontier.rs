use crate::result::Target;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;
use url::Url;

/// Admission hook consulted for every in-scope URL before it is queued.
/// Returning `false` keeps the URL out of the crawl (robots.txt rules,
/// excluded paths, logout links…).
pub type UrlFilter = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Offered before, whether or not it has been fetched yet.
    Duplicate,
    OutOfScope,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take {
    Next(Url),
    /// Queue is empty but a worker still holds a URL whose links may refill it.
    Pending,
    Exhausted,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Url>,
    offered: HashSet<String>,
    in_flight: usize,
    closed: bool,
}

/// Work queue plus the history of every URL ever offered.
///
/// A URL enters the queue at most once per run: membership is decided at
/// offer time against the full history, never against the current queue.
/// `offer`, `claim`, `take` and `done` each hold the single state lock for
/// O(1) work and never across an await point.
pub struct Frontier {
    target: Target,
    filter: Option<UrlFilter>,
    state: Mutex<State>,
    changed: Notify,
}

impl Frontier {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            filter: None,
            state: Mutex::new(State::default()),
            changed: Notify::new(),
        }
    }

    pub fn with_filter(mut self, filter: UrlFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn offer(&self, url: &Url) -> Offer {
        let mut url = url.clone();
        url.set_fragment(None);

        if url.scheme() != "http" && url.scheme() != "https" {
            return Offer::Excluded;
        }
        if !self.target.in_scope(&url) {
            return Offer::OutOfScope;
        }
        if !self.admits(&url) {
            debug!("Admission hook rejected {}", url);
            return Offer::Excluded;
        }

        {
            let mut state = self.lock();
            if state.closed || !state.offered.insert(url.to_string()) {
                return Offer::Duplicate;
            }
            debug!("Queuing {}", url);
            state.queue.push_back(url);
        }
        self.changed.notify_waiters();
        Offer::Queued
    }

    /// Whether the admission hook lets `url` into the crawl. Scope is not
    /// checked here.
    pub fn admits(&self, url: &Url) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(url))
    }

    /// Records `url` in the offer history without queueing it. Returns
    /// `false` if it was already there.
    pub fn claim(&self, url: &Url) -> bool {
        let mut url = url.clone();
        url.set_fragment(None);
        self.lock().offered.insert(url.to_string())
    }

    /// Pops the next URL in FIFO order. A returned URL stays in flight until
    /// the caller reports it with [`Frontier::done`].
    pub fn take(&self) -> Take {
        let mut state = self.lock();
        if state.closed {
            return Take::Exhausted;
        }
        match state.queue.pop_front() {
            Some(url) => {
                state.in_flight += 1;
                Take::Next(url)
            }
            None if state.in_flight > 0 => Take::Pending,
            None => Take::Exhausted,
        }
    }

    /// Waits until a URL is available or the frontier is exhausted.
    pub async fn next(&self) -> Option<Url> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a wake-up between the
            // check and the await cannot be lost.
            notified.as_mut().enable();

            match self.take() {
                Take::Next(url) => return Some(url),
                Take::Exhausted => return None,
                Take::Pending => notified.await,
            }
        }
    }

    pub fn done(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Drops everything still queued; every later `take` is `Exhausted`.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.queue.clear();
        }
        self.changed.notify_waiters();
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn offered(&self) -> usize {
        self.lock().offered.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight == 0
    }
}

/// Holds one in-flight slot taken by [`Frontier::next`] and releases it on
/// drop. Dropped during a panic it also closes the frontier, so the other
/// workers stop instead of waiting on links that will never arrive.
pub struct InFlight<'a>(&'a Frontier);

impl<'a> InFlight<'a> {
    pub fn new(frontier: &'a Frontier) -> Self {
        Self(frontier)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.close();
        }
        self.0.done();
    }
}
