//! HTTP GET prober
//!
//! Requests are paced at the run's target rate, ramping up in five equal steps
//! over `ramp_up_secs`, with at most `concurrency` requests in flight. A target
//! that cannot be connected to during preflight fails the run.

use super::{ProbeFault, ProbeItem, ProbeStream, TargetProber};
use crate::error::{EngineError, Result};
use crate::types::{EventKind, ProbeOutcome, RunConfig};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

const RAMP_STEPS: u64 = 5;

/// Target rate over time since the stream was opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RateSchedule {
    target_rate_per_sec: u64,
    ramp_up_secs: u64,
}

impl RateSchedule {
    pub fn new(target_rate_per_sec: u64, ramp_up_secs: u64) -> Self {
        Self {
            target_rate_per_sec: target_rate_per_sec.max(1),
            ramp_up_secs,
        }
    }

    /// Requests per second `elapsed` after opening
    pub fn rate_at(&self, elapsed: Duration) -> u64 {
        if self.ramp_up_secs == 0 || elapsed.as_secs() >= self.ramp_up_secs {
            return self.target_rate_per_sec;
        }
        let step_ms = (self.ramp_up_secs.saturating_mul(1000) / RAMP_STEPS).max(1);
        let step = (elapsed.as_millis() as u64 / step_ms + 1).min(RAMP_STEPS);
        (self.target_rate_per_sec.saturating_mul(step) / RAMP_STEPS).max(1)
    }

    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_at(elapsed) as f64)
    }
}

/// Probes `RunConfig::target` with GET requests
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rope-runlab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn parse_target(config: &RunConfig) -> std::result::Result<reqwest::Url, ProbeFault> {
    reqwest::Url::parse(&config.target)
        .map_err(|e| ProbeFault::InvalidTarget(format!("{}: {}", config.target, e)))
}

#[async_trait]
impl TargetProber for HttpProber {
    fn name(&self) -> &str {
        "http"
    }

    async fn preflight(&self, config: &RunConfig) -> std::result::Result<(), ProbeFault> {
        let url = parse_target(config)?;
        let timeout = Duration::from_secs(config.per_event_timeout_secs.max(1));

        match self.client.get(url.clone()).timeout(timeout).send().await {
            // Any HTTP response means the target is reachable
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "Preflight ok");
                Ok(())
            }
            Err(e) if e.is_connect() || e.is_timeout() => Err(ProbeFault::Unreachable {
                target: url.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Err(ProbeFault::InvalidTarget(format!("{}: {}", url, e))),
        }
    }

    fn probe(&self, config: &RunConfig) -> ProbeStream {
        let url = match parse_target(config) {
            Ok(url) => url,
            Err(fault) => return stream::once(async move { Err::<ProbeOutcome, _>(fault) }).boxed(),
        };

        let request = Request {
            client: self.client.clone(),
            url,
            timeout: Duration::from_secs(config.per_event_timeout_secs.max(1)),
            retries: config.retries,
        };
        let schedule = RateSchedule::new(config.target_rate_per_sec, config.ramp_up_secs);
        let opened = Instant::now();

        // One unit per request slot, paced by the schedule
        let slots = stream::unfold(opened, move |next| async move {
            sleep_until(next).await;
            let now = Instant::now();
            Some(((), now + schedule.interval_at(now - opened)))
        });

        slots
            .map(move |_| {
                let request = request.clone();
                async move { request.send().await }
            })
            .buffer_unordered(config.concurrency.max(1))
            .boxed()
    }
}

#[derive(Clone)]
struct Request {
    client: reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
    retries: u32,
}

impl Request {
    async fn send(self) -> ProbeItem {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .get(self.url.clone())
                .timeout(self.timeout)
                .send()
                .await;
            let latency_millis = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt <= self.retries {
                        debug!(url = %self.url, status = status.as_u16(), attempt, "Retrying");
                        continue;
                    }

                    let outcome = if status.is_success() {
                        ProbeOutcome::success(format!("GET {}", self.url))
                    } else {
                        ProbeOutcome::new(EventKind::Error, "failed", format!("GET {} returned {}", self.url, status))
                    };
                    return Ok(outcome
                        .with_latency(latency_millis)
                        .with_tag("status_code", status.as_u16().to_string())
                        .with_tag("attempts", attempt.to_string()));
                }
                Err(e) if attempt <= self.retries => {
                    debug!(url = %self.url, error = %e, attempt, "Retrying");
                }
                Err(e) => {
                    let status = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "refused"
                    } else {
                        "failed"
                    };
                    return Ok(ProbeOutcome::new(EventKind::Error, status, e.to_string())
                        .with_latency(latency_millis)
                        .with_tag("attempts", attempt.to_string()));
                }
            }
        }
    }
}
