//! The link validator transform: crawls every link destination of a file.
//!
//! Each `(file, destination, line-set)` is visited at most once per process;
//! duplicate occurrences coalesce onto the same pending result. Local
//! destinations are checked inline against the anchor index, email
//! destinations get a syntax check plus a deferred MX lookup, and remote
//! destinations dispatch through the validator registry onto spawned probe
//! tasks. `close(file)` waits for quiescence and drains the per-file
//! diagnostics in deterministic order.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::anchors::{abs_local_link, relative_path, AnchorIndex};
use crate::cache::UrlCache;
use crate::coalesce::{FutureKey, FutureResult, FutureTable, Producer};
use crate::config::ValidateConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{CheckError, ErrorKind, Result};
use crate::metrics::LinkMetrics;
use crate::probe::{HttpProbe, ProbeConfig, ProbeObserver};
use crate::registry::{Decision, ValidatorRegistry};
use crate::transform::{LinkTransformer, SourceContext, REMOTE_LINK_PREFIX_RE};

/// HTML5 email shape, from the W3C HTML specification.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("static pattern")
});

/// Shared state of the spawned remote checks. One live probe per URL at any
/// instant; concurrent requesters await the single in-flight result.
struct RemoteChecker {
    results: moka::future::Cache<String, std::result::Result<(), CheckError>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    probe: HttpProbe,
    storage: Option<Arc<UrlCache>>,
}

impl RemoteChecker {
    /// Spawn a probe for the destination unless one already ran. On success
    /// the URL is recorded in the persistent cache; a cache write failure is
    /// only a warning and the link stays valid.
    fn dispatch(self: &Arc<Self>, dest: &str) {
        let checker = Arc::clone(self);
        let dest = dest.to_string();
        let handle = tokio::spawn(async move {
            let inner = Arc::clone(&checker);
            let url = dest.clone();
            let _ = checker
                .results
                .get_with(dest, async move {
                    let res = inner.probe.check(&url).await;
                    if res.is_ok() {
                        if let Some(storage) = &inner.storage {
                            if let Err(err) = storage.cache_url(&url) {
                                tracing::warn!(url = %url, error = %err, "remote link not saved to cache");
                            }
                        }
                    }
                    res
                })
                .await;
        });
        self.handles.lock().expect("handles lock poisoned").push(handle);
    }

    /// Spawn an MX resolution for the mailto destination.
    fn dispatch_mail(self: &Arc<Self>, dest: &str, domain: String) {
        let checker = Arc::clone(self);
        let dest = dest.to_string();
        let handle = tokio::spawn(async move {
            let _ = checker
                .results
                .get_with(dest, async move { lookup_mx(&domain).await })
                .await;
        });
        self.handles.lock().expect("handles lock poisoned").push(handle);
    }

    async fn result_for(&self, dest: &str) -> Option<CheckError> {
        match self.results.get(dest).await {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(err),
            // The task never recorded a result; only possible when it was
            // torn down by cancellation.
            None => Some(CheckError::Cancelled),
        }
    }
}

async fn lookup_mx(domain: &str) -> std::result::Result<(), CheckError> {
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            return Err(CheckError::MxLookup {
                domain: domain.to_string(),
                details: err.to_string(),
            });
        }
    };
    match resolver.mx_lookup(domain).await {
        Ok(mx) if mx.iter().next().is_some() => Ok(()),
        Ok(_) => Err(CheckError::NoMxRecords {
            domain: domain.to_string(),
        }),
        Err(err) => match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Err(CheckError::NoMxRecords {
                domain: domain.to_string(),
            }),
            _ => Err(CheckError::MxLookup {
                domain: domain.to_string(),
                details: err.to_string(),
            }),
        },
    }
}

/// Link transform that validates every destination it sees.
pub struct LinkValidator {
    anchor_dir: PathBuf,
    config: ValidateConfig,
    registry: ValidatorRegistry,
    local_links: AnchorIndex,
    futures: FutureTable,
    remote: Arc<RemoteChecker>,
    metrics: Option<Arc<LinkMetrics>>,
}

impl LinkValidator {
    /// Build a validator from parsed configuration. GitHub validators
    /// preflight the API here; the probe inherits timeout, parallelism,
    /// per-host ceilings and random delay from the configuration.
    pub async fn new(
        config: ValidateConfig,
        anchor_dir: &Path,
        storage: Option<Arc<UrlCache>>,
        metrics: Option<Arc<LinkMetrics>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let probe_config = ProbeConfig {
            timeout: config.timeout(),
            parallelism: config.parallelism.max(0) as usize,
            host_max_conns: config.host_max_conns,
            random_delay: config.random_delay(),
            ..ProbeConfig::default()
        };
        let observer = metrics
            .clone()
            .map(|m| m as Arc<dyn ProbeObserver>);
        let probe = HttpProbe::new(probe_config, shutdown, observer)?;

        let preflight_client = reqwest::Client::builder()
            .build()
            .map_err(CheckError::from)?;
        let registry = ValidatorRegistry::build(&config, &preflight_client).await?;

        Ok(Self {
            anchor_dir: anchor_dir.to_path_buf(),
            config,
            registry,
            local_links: AnchorIndex::new(),
            futures: FutureTable::new(),
            remote: Arc::new(RemoteChecker {
                results: moka::future::Cache::builder().build(),
                handles: Mutex::new(Vec::new()),
                probe,
                storage,
            }),
            metrics,
        })
    }

    fn visit(&mut self, filepath: &Path, dest: &str, line_numbers: &str) {
        let key = FutureKey {
            filepath: filepath.to_path_buf(),
            dest: dest.to_string(),
            line_numbers: line_numbers.to_string(),
        };
        if !self.futures.visit(key.clone()) {
            return;
        }

        if !self.config.explicit_local_validators {
            if !REMOTE_LINK_PREFIX_RE.is_match(dest) {
                self.check_local(&key);
                return;
            }
            if let Some(metrics) = &self.metrics {
                metrics.inc_remote_checked();
            }
        }

        match self.registry.dispatch(dest) {
            Decision::AcceptedIgnore => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_ignore_skipped();
                }
            }
            Decision::AcceptedGitHub => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_github_skipped();
                }
            }
            Decision::RoundTrip => self.round_trip(&key),
        }
    }

    fn round_trip(&mut self, key: &FutureKey) {
        // With explicit local validators, local paths are routed through the
        // registry and fall back to the direct check here.
        if !REMOTE_LINK_PREFIX_RE.is_match(&key.dest) {
            self.check_local(key);
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_round_trip_visited();
        }

        if let Some(storage) = &self.remote.storage {
            match storage.is_cached(&key.dest) {
                Ok(true) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_round_trip_cached();
                    }
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(url = %key.dest, error = %err, "cache lookup failed");
                }
            }
        }

        self.remote.dispatch(&key.dest);
        self.futures
            .set_producer(key, Producer::Deferred(key.dest.clone()));
    }

    fn check_local(&mut self, key: &FutureKey) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_local_checked();
        }

        // Email destination.
        if let Some(email) = key.dest.strip_prefix("mailto:") {
            if !is_valid_email(email) {
                self.futures.set_producer(
                    key,
                    Producer::Ready(Some(CheckError::InvalidEmail {
                        dest: key.dest.clone(),
                    })),
                );
                return;
            }
            let domain = email
                .split('@')
                .nth(1)
                .unwrap_or_default()
                .to_string();
            self.remote.dispatch_mail(&key.dest, domain);
            self.futures
                .set_producer(key, Producer::Deferred(key.dest.clone()));
            return;
        }

        // Relative or absolute path: check existence and anchor.
        let normalized = abs_local_link(&self.anchor_dir, &key.filepath, &key.dest);
        if let Err(err) = self.local_links.lookup(&normalized) {
            self.futures.set_producer(
                key,
                Producer::Ready(Some(
                    err.wrap(format!("link {}, normalized to", key.dest)),
                )),
            );
        }
    }

    async fn resolve(&self, entry: &FutureResult) -> Option<CheckError> {
        match &entry.producer {
            Producer::Ready(res) => res.clone(),
            Producer::Deferred(dest) => self.remote.result_for(dest).await,
        }
    }
}

#[async_trait]
impl LinkTransformer for LinkValidator {
    fn transform_destination(&mut self, ctx: &SourceContext, destination: &str) -> Result<String> {
        self.visit(&ctx.filepath, destination, &ctx.line_numbers);
        Ok(destination.to_string())
    }

    async fn close(&mut self, ctx: &SourceContext) -> Result<()> {
        // Quiescence barrier: wait for every in-flight check.
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .remote
                .handles
                .lock()
                .expect("handles lock poisoned");
            guard.drain(..).collect()
        };
        let _ = futures::future::join_all(handles).await;

        let base = std::env::current_dir()
            .map_err(|e| CheckError::from(e).wrap("resolve working dir"))?;
        let rel = relative_path(&ctx.filepath, &base);

        let mut diag = Diagnostics::new();
        let mut cancelled_emitted = false;
        for (key, entry) in self.futures.drain_file(&ctx.filepath) {
            let Some(err) = self.resolve(&entry).await else {
                continue;
            };
            if err.is_kind(ErrorKind::Cancelled) {
                // Cancellation flushes through all pending futures but is
                // reported once.
                if !cancelled_emitted {
                    cancelled_emitted = true;
                    diag.add(CheckError::Cancelled);
                }
                continue;
            }
            let context = if entry.occurrences == 1 {
                format!("{}:{}", rel, key.line_numbers)
            } else {
                format!(
                    "{}:{} ({} occurrences)",
                    rel, key.line_numbers, entry.occurrences
                )
            };
            diag.add(err.wrap(context));
        }
        diag.into_result()
    }
}

/// Check email structure: length guard plus the HTML5 regex.
fn is_valid_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 254 {
        return false;
    }
    EMAIL_RE.is_match(email)
}
