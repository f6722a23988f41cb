//! Worker lifecycle — install, activate, serve, and answer control messages.
//!
//! A [`Worker`] owns one deployed *version* of the cache: a static namespace
//! pre-populated from the install manifest and a dynamic namespace that the
//! strategies fill at runtime. It moves through:
//!
//! ```text
//! installing ──install()──▶ installed ──activate()──▶ activating ──▶ active
//!      │                        ▲
//!      └── manifest failure ──▶ redundant (never activates; build a new worker)
//! ```
//!
//! Activation deletes every namespace that does not belong to this version, so
//! storage used by earlier deployments is reclaimed in one step.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, RequestKey, StorageError};
use crate::clock::Clock;
use crate::fetch::{Fetch, FetchError, FetchRequest};
use crate::http::StatusCode;
use crate::router::RouteTable;
use crate::strategy::{Executor, Outcome, Strategy, StrategyError, is_cacheable};

/// Lifecycle phase of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        })
    }
}

/// Fire-and-forget commands accepted on the control channel.
///
/// Deserializes from `{"type": "SKIP_WAITING"}` and `{"type": "CLEAR_CACHE"}`.
/// Any other `type` maps to [`Unknown`](Self::Unknown) and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    ClearCache,
    #[serde(other)]
    Unknown,
}

/// Errors raised by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("install failed: fetching {path} failed: {source}")]
    ManifestFetch {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error("install failed: {path} answered {status}")]
    ManifestStatus { path: String, status: StatusCode },

    #[error("storage failed during {action}: {source}")]
    Storage {
        action: &'static str,
        #[source]
        source: StorageError,
    },
}

/// Paths pre-cached at install time when no manifest is configured.
pub const DEFAULT_MANIFEST: &[&str] = &["/", "/index.html", "/manifest.json", "/favicon.ico"];

/// Static description of one deployed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Base URL (`http://host:port`) that manifest paths and request targets are resolved against.
    pub origin: String,
    pub static_namespace: String,
    pub dynamic_namespace: String,
    /// Absolute paths that must all be fetched successfully during install.
    pub manifest: Vec<String>,
    /// Activate as soon as install succeeds instead of waiting for `SKIP_WAITING`.
    pub skip_waiting: bool,
}

impl WorkerSettings {
    /// Settings for `version` with `static-<version>` / `dynamic-<version>`
    /// namespaces and the default manifest.
    pub fn new(origin: impl Into<String>, version: &str) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_owned(),
            static_namespace: format!("static-{version}"),
            dynamic_namespace: format!("dynamic-{version}"),
            manifest: DEFAULT_MANIFEST.iter().map(|p| (*p).to_owned()).collect(),
            skip_waiting: false,
        }
    }

    /// Resolves an origin-form target (`/path?query`) against [`origin`](Self::origin).
    pub fn url_for(&self, target: &str) -> String {
        if target.starts_with('/') {
            format!("{}{}", self.origin, target)
        } else {
            format!("{}/{}", self.origin, target)
        }
    }
}

/// Point-in-time view of a worker, suitable for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub phase: Phase,
    pub static_namespace: String,
    pub dynamic_namespace: String,
    pub namespaces: Vec<String>,
}

/// The cache router service object.
///
/// Built once per process with its collaborators injected. The owner drives
/// it explicitly: [`install`](Self::install), then [`activate`](Self::activate)
/// (or a `SKIP_WAITING` message), then [`handle`](Self::handle) per request.
pub struct Worker {
    settings: WorkerSettings,
    routes: RouteTable,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetch>,
    clock: Arc<dyn Clock>,
    executor: Executor,
    phase: RwLock<Phase>,
    skip_waiting: AtomicBool,
    // Serializes install, activate, and clear-all.
    transition: Mutex<()>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("settings", &self.settings)
            .field("routes", &self.routes)
            .field("skip_waiting", &self.skip_waiting)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(
        settings: WorkerSettings,
        routes: RouteTable,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetch>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&clock),
            settings.dynamic_namespace.as_str(),
        );
        let skip_waiting = AtomicBool::new(settings.skip_waiting);
        Self {
            settings,
            routes,
            store,
            fetcher,
            clock,
            executor,
            phase: RwLock::new(Phase::Installing),
            skip_waiting,
            transition: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.write().await;
        let from = *current;
        debug!(%from, to = %phase, "phase transition");
        *current = phase;
    }

    /// Fetches every manifest path and, only if all of them succeed, writes
    /// them into the static namespace.
    ///
    /// Any failure leaves the worker [`Phase::Redundant`]; the static namespace
    /// is left without the new manifest and the caller must retry with a new
    /// worker. With `skip_waiting` set (in settings or by a `SKIP_WAITING`
    /// message received meanwhile) a successful install activates immediately.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidPhase`] — not in [`Phase::Installing`].
    /// - [`LifecycleError::ManifestFetch`] / [`LifecycleError::ManifestStatus`] — a manifest path failed.
    /// - [`LifecycleError::Storage`] — writing the static namespace failed.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        {
            let _guard = self.transition.lock().await;
            let phase = self.phase().await;
            if phase != Phase::Installing {
                return Err(LifecycleError::InvalidPhase {
                    action: "install",
                    phase,
                });
            }

            info!(
                namespace = %self.settings.static_namespace,
                assets = self.settings.manifest.len(),
                "installing: caching static assets"
            );

            if let Err(err) = self.precache().await {
                warn!(error = %err, "install failed; worker is redundant");
                self.set_phase(Phase::Redundant).await;
                return Err(err);
            }

            self.set_phase(Phase::Installed).await;
            info!("installed");
        }

        if self.skip_waiting.load(Ordering::SeqCst) {
            self.activate().await?;
        }
        Ok(())
    }

    async fn precache(&self) -> Result<(), LifecycleError> {
        let mut fetched = Vec::with_capacity(self.settings.manifest.len());
        for path in &self.settings.manifest {
            let request = FetchRequest::get(self.settings.url_for(path));
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|source| LifecycleError::ManifestFetch {
                    path: path.clone(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(LifecycleError::ManifestStatus {
                    path: path.clone(),
                    status: response.status(),
                });
            }
            fetched.push((RequestKey::new(request.method(), request.url()), response));
        }

        let stored_at = self.clock.now();
        for (key, response) in &fetched {
            let put = self
                .store
                .put(&self.settings.static_namespace, key, response, stored_at)
                .await;
            if let Err(source) = put {
                // Roll back so no partial manifest is ever visible.
                if let Err(e) = self.store.delete_namespace(&self.settings.static_namespace).await {
                    warn!(error = %e, "failed to roll back static namespace");
                }
                return Err(LifecycleError::Storage {
                    action: "install",
                    source,
                });
            }
        }
        Ok(())
    }

    /// Makes this version authoritative: deletes every namespace other than
    /// the current static and dynamic ones and makes sure both exist.
    ///
    /// Returns the names of the deleted namespaces. Calling it again once
    /// active is a no-op. In-flight requests are not waited for.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidPhase`] — not yet installed, or redundant.
    /// - [`LifecycleError::Storage`] — listing or deleting namespaces failed;
    ///   the worker stays installed and activation may be retried.
    pub async fn activate(&self) -> Result<Vec<String>, LifecycleError> {
        let _guard = self.transition.lock().await;
        match self.phase().await {
            Phase::Installed => {}
            Phase::Active => return Ok(Vec::new()),
            phase => {
                return Err(LifecycleError::InvalidPhase {
                    action: "activate",
                    phase,
                });
            }
        }

        self.set_phase(Phase::Activating).await;
        match self.reclaim().await {
            Ok(deleted) => {
                self.set_phase(Phase::Active).await;
                info!(deleted = deleted.len(), "activated");
                Ok(deleted)
            }
            Err(source) => {
                self.set_phase(Phase::Installed).await;
                Err(LifecycleError::Storage {
                    action: "activate",
                    source,
                })
            }
        }
    }

    async fn reclaim(&self) -> Result<Vec<String>, StorageError> {
        let current = [
            self.settings.static_namespace.as_str(),
            self.settings.dynamic_namespace.as_str(),
        ];

        let mut deleted = Vec::new();
        for name in self.store.list_namespaces().await? {
            if current.contains(&name.as_str()) {
                continue;
            }
            info!(namespace = %name, "deleting old cache namespace");
            self.store.delete_namespace(&name).await?;
            deleted.push(name);
        }

        for name in current {
            self.store.ensure_namespace(name).await?;
        }
        Ok(deleted)
    }

    /// Applies a control-channel message.
    ///
    /// # Errors
    ///
    /// Propagates failures of the activation or cache wipe it triggers.
    pub async fn handle_control(&self, message: ControlMessage) -> Result<(), LifecycleError> {
        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                match self.phase().await {
                    Phase::Installed => {
                        self.activate().await?;
                    }
                    phase => debug!(%phase, "skip-waiting recorded"),
                }
            }
            ControlMessage::ClearCache => {
                let cleared = self.clear_all().await.map_err(|source| LifecycleError::Storage {
                    action: "clear caches",
                    source,
                })?;
                info!(cleared, "all caches cleared");
            }
            ControlMessage::Unknown => debug!("ignoring unknown control message"),
        }
        Ok(())
    }

    /// Deletes every namespace, this version's included. Returns how many
    /// were deleted.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`]; namespaces deleted before it stay deleted.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let _guard = self.transition.lock().await;
        let names = self.store.list_namespaces().await?;
        for name in &names {
            self.store.delete_namespace(name).await?;
        }
        Ok(names.len())
    }

    /// Picks the strategy for `request`, or `None` if it bypasses the cache.
    pub fn classify(&self, request: &FetchRequest) -> Option<Strategy> {
        is_cacheable(request).then(|| self.routes.classify(request.url()))
    }

    /// Serves one request.
    ///
    /// Non-cacheable requests, and every request before activation, go to
    /// the network unchanged.
    ///
    /// # Errors
    ///
    /// See [`Executor::execute`].
    pub async fn handle(&self, request: &FetchRequest) -> Result<Outcome, StrategyError> {
        let active = self.phase().await == Phase::Active;
        let strategy = match self.classify(request) {
            Some(strategy) if active => strategy,
            Some(_) => {
                debug!(url = request.url(), "not active yet; passing through");
                Strategy::NetworkOnly
            }
            None => {
                debug!(method = %request.method(), url = request.url(), "bypassing cache");
                Strategy::NetworkOnly
            }
        };

        debug!(url = request.url(), %strategy, "handling request");
        self.executor.execute(strategy, request).await
    }

    /// Snapshot of phase and live namespaces.
    ///
    /// # Errors
    ///
    /// Returns the store's error if namespaces cannot be listed.
    pub async fn status(&self) -> Result<WorkerStatus, StorageError> {
        Ok(WorkerStatus {
            phase: self.phase().await,
            static_namespace: self.settings.static_namespace.clone(),
            dynamic_namespace: self.settings.dynamic_namespace.clone(),
            namespaces: self.store.list_namespaces().await?,
        })
    }
}
