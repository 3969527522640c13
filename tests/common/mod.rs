// tests/common/mod.rs
//
// Test doubles shared by the integration tests: scripted sources and
// providers, a recording messenger and a recording event sink.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use usdt_rate_bot::notify::Messenger;
use usdt_rate_bot::rates::{
    AllSourcesFailed, QuoteProvider, RateQuote, RateSource, SourceError, SourceFailure,
};
use usdt_rate_bot::telemetry::{EventSink, PipelineEvent};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// One scripted answer. The last step of a script repeats forever.
#[derive(Debug, Clone)]
pub enum Step {
    Rate(&'static str),
    Fail(SourceError),
    /// Never answers; only a timeout gets past it.
    Hang,
}

fn next_step(steps: &Mutex<VecDeque<Step>>) -> Step {
    let mut q = steps.lock();
    if q.len() > 1 {
        q.pop_front().unwrap()
    } else {
        q.front().cloned().expect("script must not be empty")
    }
}

pub struct ScriptedSource {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn script(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(name: &str, value: &'static str) -> Arc<Self> {
        Self::script(name, vec![Step::Rate(value)])
    }

    pub fn failing(name: &str, error: SourceError) -> Arc<Self> {
        Self::script(name, vec![Step::Fail(error)])
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Self::script(name, vec![Step::Hang])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for ScriptedSource {
    async fn fetch_quote(&self) -> Result<RateQuote, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match next_step(&self.steps) {
            Step::Rate(v) => RateQuote::new(dec(v), &self.name),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Stands in for the aggregator behind the cache. Counts refreshes and can
/// take `delay` per call to widen race windows.
pub struct CountingProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_delay(steps, Duration::ZERO)
    }

    pub fn with_delay(steps: Vec<Step>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn down() -> Step {
    Step::Fail(SourceError::fetch("connection refused"))
}

#[async_trait]
impl QuoteProvider for CountingProvider {
    async fn fetch(&self) -> Result<RateQuote, AllSourcesFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = |error: SourceError| AllSourcesFailed {
            failures: vec![SourceFailure {
                source: "P".to_string(),
                error,
            }],
        };
        match next_step(&self.steps) {
            Step::Rate(v) => RateQuote::new(dec(v), "P").map_err(fail),
            Step::Fail(e) => Err(fail(e)),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub channel: String,
    pub topic: Option<String>,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, channel: &str, topic: Option<&str>, text: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("chat unreachable");
        }
        self.sent.lock().push(Sent {
            channel: channel.to_string(),
            topic: topic.map(str::to_string),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &PipelineEvent) {
        self.events.lock().push(event.clone());
    }
}
