//! Single-URL HTTP liveness probe with bounded parallelism and retries.
//!
//! All probes share one `reqwest` client. Requests are gated by a global
//! parallelism semaphore and, when configured, a per-host connection
//! ceiling plus a uniform random delay. Rate-limited responses are retried
//! once honoring `Retry-After`; redirect/unavailable/transport failures are
//! retried once immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{watch, Semaphore};

use crate::error::{CheckError, Result};

/// Default cap on concurrent probe requests across all hosts.
pub const DEFAULT_PARALLELISM: usize = 100;

/// Hook invoked once per HTTP request, after the response (or transport
/// failure) is observed. `status` is `None` on transport-level failure.
pub trait ProbeObserver: Send + Sync {
    fn observe(&self, host: &str, status: Option<u16>, latency: Duration);
}

/// Probe configuration, mapped from the validate config.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Per-request timeout; `None` leaves the client default (no timeout).
    pub timeout: Option<Duration>,
    /// Global request parallelism cap.
    pub parallelism: usize,
    /// Optional per-host concurrent connection ceiling.
    pub host_max_conns: Option<usize>,
    /// Optional uniform random delay in `[0, random_delay]` before each
    /// request.
    pub random_delay: Option<Duration>,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            parallelism: DEFAULT_PARALLELISM,
            host_max_conns: None,
            random_delay: None,
            user_agent: format!("mdkit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Explicit per-request retry bookkeeping.
#[derive(Debug, Default)]
struct RetryState {
    retried: bool,
}

/// Shared HTTP prober. Cheap to clone behind `Arc`; owns the client, the
/// semaphores and the cancellation receiver.
pub struct HttpProbe {
    client: reqwest::Client,
    global: Semaphore,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    config: ProbeConfig,
    shutdown: watch::Receiver<bool>,
    observer: Option<Arc<dyn ProbeObserver>>,
}

impl HttpProbe {
    pub fn new(
        config: ProbeConfig,
        shutdown: watch::Receiver<bool>,
        observer: Option<Arc<dyn ProbeObserver>>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(CheckError::from)?;

        let parallelism = if config.parallelism == 0 {
            DEFAULT_PARALLELISM
        } else {
            config.parallelism
        };

        Ok(Self {
            client,
            global: Semaphore::new(parallelism),
            per_host: Mutex::new(HashMap::new()),
            config,
            shutdown,
            observer,
        })
    }

    /// GET the URL and classify the outcome. Success is any 2xx after the
    /// client followed redirects.
    pub async fn check(&self, url: &str) -> Result<()> {
        let _global = self
            .global
            .acquire()
            .await
            .map_err(|_| CheckError::Cancelled)?;

        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let _host_permit = match self.host_semaphore(&host) {
            Some(sem) => Some(
                sem.acquire_owned()
                    .await
                    .map_err(|_| CheckError::Cancelled)?,
            ),
            None => None,
        };

        if let Some(delay) = self.config.random_delay {
            if !delay.is_zero() {
                let wait = rand::thread_rng().gen_range(0..=delay.as_millis() as u64);
                self.sleep(Duration::from_millis(wait)).await?;
            }
        }

        let mut state = RetryState::default();
        loop {
            if *self.shutdown.borrow() {
                return Err(CheckError::Cancelled);
            }

            let started = Instant::now();
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if let Some(observer) = &self.observer {
                        observer.observe(&host, Some(status.as_u16()), started.elapsed());
                    }
                    if status.is_success() {
                        return Ok(());
                    }
                    match status.as_u16() {
                        429 => {
                            if state.retried {
                                return Err(CheckError::RateLimited {
                                    url: url.to_string(),
                                    status: status.as_u16(),
                                });
                            }
                            state.retried = true;
                            let secs = retry_after_seconds(&resp);
                            self.sleep(Duration::from_secs(secs)).await?;
                        }
                        301 | 307 | 503 => {
                            if state.retried {
                                return Err(CheckError::NotAccessibleAfterRetry {
                                    url: url.to_string(),
                                    status: status.as_u16(),
                                });
                            }
                            state.retried = true;
                        }
                        other => {
                            return Err(CheckError::NotAccessible {
                                url: url.to_string(),
                                status: other,
                            });
                        }
                    }
                }
                Err(err) => {
                    if let Some(observer) = &self.observer {
                        observer.observe(&host, None, started.elapsed());
                    }
                    tracing::debug!(url, error = %err, "probe transport failure");
                    // Transport-level failure: status code 0.
                    if state.retried {
                        return Err(CheckError::NotAccessibleAfterRetry {
                            url: url.to_string(),
                            status: 0,
                        });
                    }
                    state.retried = true;
                }
            }
        }
    }

    fn host_semaphore(&self, host: &str) -> Option<Arc<Semaphore>> {
        let max = self.config.host_max_conns?;
        let mut hosts = self.per_host.lock().expect("probe lock poisoned");
        Some(Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(max))),
        ))
    }

    /// Sleep that aborts with `Cancelled` when the process-wide shutdown
    /// signal fires.
    async fn sleep(&self, duration: Duration) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(CheckError::Cancelled);
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = shutdown.changed() => Err(CheckError::Cancelled),
        }
    }
}

fn retry_after_seconds(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(config: ProbeConfig) -> HttpProbe {
        let (_tx, rx) = watch::channel(false);
        HttpProbe::new(config, rx, None).unwrap()
    }

    #[tokio::test]
    async fn test_probe_creation() {
        let p = probe(ProbeConfig::default());
        assert_eq!(p.global.available_permits(), DEFAULT_PARALLELISM);
    }

    #[tokio::test]
    async fn test_zero_parallelism_falls_back_to_default() {
        let p = probe(ProbeConfig {
            parallelism: 0,
            ..Default::default()
        });
        assert_eq!(p.global.available_permits(), DEFAULT_PARALLELISM);
    }

    #[tokio::test]
    async fn test_host_semaphore_only_when_configured() {
        let p = probe(ProbeConfig::default());
        assert!(p.host_semaphore("example.com").is_none());

        let p = probe(ProbeConfig {
            host_max_conns: Some(2),
            ..Default::default()
        });
        let sem = p.host_semaphore("example.com").unwrap();
        assert_eq!(sem.available_permits(), 2);
        // Same host maps to the same semaphore.
        let again = p.host_semaphore("example.com").unwrap();
        assert!(Arc::ptr_eq(&sem, &again));
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_aborts_check() {
        let (tx, rx) = watch::channel(false);
        let p = HttpProbe::new(ProbeConfig::default(), rx, None).unwrap();
        tx.send(true).unwrap();
        let err = p.check("https://example.com").await.unwrap_err();
        assert!(matches!(err, CheckError::Cancelled));
    }

    #[tokio::test]
    #[ignore] // Requires internet connectivity - run with: cargo test -- --ignored
    async fn test_check_real_url() {
        let p = probe(ProbeConfig::default());
        p.check("https://www.rust-lang.org").await.unwrap();
    }
}
