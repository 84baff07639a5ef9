use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{BrowserDriver, BrowserError, PageSession, Viewport, WaitUntil};
use crate::clock::Clock;

pub(crate) const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Open(DateTime<Utc>),
    Navigate(WaitUntil),
    Click(String, bool),
    Evaluate(String),
    Screenshot(DateTime<Utc>),
    Close,
}

struct Inner {
    clock: Arc<dyn Clock>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<Vec<WaitUntil>>,
    labels: Mutex<HashSet<String>>,
    broken_clicks: Mutex<HashSet<String>>,
    load_time: Mutex<Duration>,
    fail_launch: Mutex<bool>,
}

/// Scriptable stand-in for Chrome. Page loads cost tokio time, so tests can
/// run under a paused clock.
#[derive(Clone)]
pub(crate) struct FakeDriver {
    inner: Arc<Inner>,
}

impl FakeDriver {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(Vec::new()),
                labels: Mutex::new(HashSet::new()),
                broken_clicks: Mutex::new(HashSet::new()),
                load_time: Mutex::new(Duration::ZERO),
                fail_launch: Mutex::new(false),
            }),
        }
    }

    pub(crate) fn fail_navigation(self, wait: WaitUntil) -> Self {
        self.inner.failing.lock().push(wait);
        self
    }

    pub(crate) fn fail_launch(self) -> Self {
        *self.inner.fail_launch.lock() = true;
        self
    }

    pub(crate) fn with_labels(self, labels: &[&str]) -> Self {
        self.inner
            .labels
            .lock()
            .extend(labels.iter().map(|l| l.to_string()));
        self
    }

    /// Clicking `label` errors instead of reporting present or absent.
    pub(crate) fn fail_click(self, label: &str) -> Self {
        self.inner.broken_clicks.lock().insert(label.to_string());
        self
    }

    pub(crate) fn with_load_time(self, load_time: Duration) -> Self {
        *self.inner.load_time.lock() = load_time;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    pub(crate) fn opened_at(&self) -> Vec<DateTime<Utc>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Open(at) => Some(at),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn shot_at(&self) -> Vec<DateTime<Utc>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Screenshot(at) => Some(at),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clicked(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Click(label, true) => Some(label),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    fn record(&self, call: Call) {
        self.inner.calls.lock().push(call);
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn open(&self, _viewport: Viewport) -> Result<Box<dyn PageSession>, BrowserError> {
        let fail_launch = *self.inner.fail_launch.lock();
        if fail_launch {
            return Err(BrowserError::LaunchFailed("no chrome binary".into()));
        }
        self.record(Call::Open(self.inner.clock.now()));
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl PageSession for FakeDriver {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.record(Call::Navigate(wait));
        let failing = self.inner.failing.lock().contains(&wait);
        if failing {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        let load_time = *self.inner.load_time.lock();
        tokio::time::sleep(load_time).await;
        Ok(())
    }

    async fn click_text(&self, label: &str, _timeout: Duration) -> Result<bool, BrowserError> {
        let broken = self.inner.broken_clicks.lock().contains(label);
        if broken {
            self.record(Call::Click(label.to_string(), false));
            return Err(BrowserError::ClickFailed(format!("{label}: node detached")));
        }
        let present = self.inner.labels.lock().contains(label);
        self.record(Call::Click(label.to_string(), present));
        Ok(present)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.record(Call::Evaluate(script.to_string()));
        Ok(serde_json::Value::String("UTC".into()))
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, BrowserError> {
        self.record(Call::Screenshot(self.inner.clock.now()));
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.record(Call::Close);
        Ok(())
    }
}
