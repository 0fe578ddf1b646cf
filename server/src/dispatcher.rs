//! Classifies visualizer requests and drives them to a rendered tree.
//!
//! A request either builds a fresh tree in a newly allocated session, or
//! continues an existing session by inserting values into its tree. Which one
//! is decided by the signed session token, not by anything else the client
//! declares:
//!
//! - a valid token continues the session it names
//! - a token that does not verify is rejected as `InvalidOrigin`
//! - no token from the start page builds a fresh tree
//! - no token from anywhere else is rejected as `InvalidOrigin`
//!
//! # Post-conditions
//!
//! - Every call to [`Dispatcher::handle`] appends exactly one audit record,
//!   including when its future is dropped before completing.
//! - A failed or abandoned fresh build leaves no session behind.
//! - A failed continuation leaves the session's tree as it was.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditLog, AuditRecord, AuditSize};
use crate::auth::{SessionClaims, SessionTokens};
use crate::engine::{EngineAction, EngineInvoker};
use crate::error::DispatchError;
use crate::params::{self, RawParameters, TreeParameters, Validated};
use crate::samples::{DEFAULT_SAMPLE, SampleCatalog};
use crate::session::{SessionGuard, SessionId, SessionStore};
use crate::time::TimeSource;

/// Which of our pages a request claims to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    StartPage,
    VisualizePage,
    Unknown,
}

impl RequestOrigin {
    /// Form value written into the hidden `from` field of each page.
    #[must_use]
    pub const fn form_value(self) -> &'static str {
        match self {
            Self::StartPage => "start",
            Self::VisualizePage => "btree",
            Self::Unknown => "",
        }
    }

    /// Origin named by a hidden `from` field.
    #[must_use]
    pub fn from_declared(value: &str) -> Self {
        match value.trim() {
            "start" => Self::StartPage,
            "btree" => Self::VisualizePage,
            _ => Self::Unknown,
        }
    }

    /// Origin named by the path of a `Referer` URL.
    #[must_use]
    pub fn from_referer(referer: &str) -> Self {
        let after_scheme = referer
            .split_once("://")
            .map_or(referer, |(_, rest)| rest);
        let path = after_scheme
            .find('/')
            .map_or("/", |index| &after_scheme[index..]);
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        match path {
            "/" | "/index" | "/index.html" => Self::StartPage,
            "/btree" => Self::VisualizePage,
            _ => Self::Unknown,
        }
    }

    /// The declared `from` field if present, else the `Referer`.
    #[must_use]
    pub fn resolve(declared: Option<&str>, referer: Option<&str>) -> Self {
        match (declared, referer) {
            (Some(value), _) if !value.trim().is_empty() => Self::from_declared(value),
            (_, Some(referer)) => Self::from_referer(referer),
            _ => Self::Unknown,
        }
    }
}

/// Where a fresh build reads its values from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    /// A file uploaded with the request.
    Upload { file_name: String, bytes: Vec<u8> },
    /// One of the canned samples, by name.
    Sample(String),
}

/// Who sent the request, for the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub address: String,
}

/// A visualizer request, decoded from the form but not yet trusted.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub origin: RequestOrigin,
    /// The origin as declared, recorded verbatim in the audit log.
    pub declared_origin: String,
    /// Session id the continue form echoes back.
    pub declared_session_id: Option<String>,
    pub session_token: Option<String>,
    pub parameters: RawParameters,
    /// Whitespace-separated values to insert.
    pub insert: Option<String>,
    /// Build source; the default sample when absent.
    pub source: Option<BuildSource>,
    pub client: ClientInfo,
}

/// What a request will do once classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    FreshBuild,
    Continue {
        id: SessionId,
        claims: SessionClaims,
    },
}

/// A rendered tree and what the result page needs to continue it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visualization {
    pub session_id: SessionId,
    pub token: String,
    pub parameters: TreeParameters,
    pub html: String,
    /// Values inserted by this request, in order.
    pub inserted: Vec<String>,
}

/// Audit columns filled in while a request is handled.
struct AuditTrail {
    event: AuditEvent,
    artifact: PathBuf,
    size: u64,
}

/// Writes the audit record of a request when dropped.
struct PendingAudit<'a> {
    dispatcher: &'a Dispatcher,
    request: &'a BuildRequest,
    validated: &'a Validated,
    trail: AuditTrail,
    succeeded: bool,
}

impl Drop for PendingAudit<'_> {
    fn drop(&mut self) {
        self.dispatcher
            .record(self.request, self.validated, &self.trail, self.succeeded);
    }
}

/// A session allocated for a fresh build. Unless kept, it is released on drop.
struct BuildReservation<'a> {
    store: &'a SessionStore,
    id: SessionId,
    keep: bool,
}

impl Drop for BuildReservation<'_> {
    fn drop(&mut self) {
        let raw_input = self.store.layout().raw_input(self.id);
        if let Err(e) = std::fs::remove_file(&raw_input) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {e}", raw_input.display());
            }
        }

        if !self.keep {
            if let Err(e) = self.store.release(self.id) {
                tracing::error!(
                    "failed to release session {} after an unfinished build: {e}",
                    self.id
                );
            }
        }
    }
}

/// A validated build source, ready to stage.
enum StagedSource<'a> {
    Upload(&'a [u8]),
    Sample(PathBuf),
}

/// Turns requests into engine runs against sessions.
pub struct Dispatcher {
    store: Arc<SessionStore>,
    engine: EngineInvoker,
    tokens: SessionTokens,
    samples: SampleCatalog,
    audit: AuditLog,
    max_upload_bytes: usize,
    time: Arc<dyn TimeSource>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        engine: EngineInvoker,
        tokens: SessionTokens,
        samples: SampleCatalog,
        audit: AuditLog,
        max_upload_bytes: usize,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            engine,
            tokens,
            samples,
            audit,
            max_upload_bytes,
            time,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Decide what a request will do, without changing any state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrigin` for a token that does not verify, a declared
    /// session id that disagrees with the token, or a token-less request that
    /// did not come from the start page.
    pub fn classify(&self, request: &BuildRequest) -> Result<Action, DispatchError> {
        let token = request
            .session_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let Some(token) = token else {
            return match request.origin {
                RequestOrigin::StartPage => Ok(Action::FreshBuild),
                RequestOrigin::VisualizePage | RequestOrigin::Unknown => {
                    Err(DispatchError::InvalidOrigin)
                }
            };
        };

        let claims = self.tokens.verify(token).map_err(|e| {
            tracing::info!("rejecting session token: {e}");
            DispatchError::InvalidOrigin
        })?;
        let id = claims
            .session_id()
            .map_err(|_| DispatchError::InvalidOrigin)?;

        if let Some(declared) = request
            .declared_session_id
            .as_deref()
            .filter(|declared| !declared.trim().is_empty())
        {
            let declared: SessionId = declared
                .parse()
                .map_err(|_| DispatchError::InvalidOrigin)?;
            if declared != id {
                tracing::info!("declared session {declared} does not match token session {id}");
                return Err(DispatchError::InvalidOrigin);
            }
        }

        Ok(Action::Continue { id, claims })
    }

    /// Handle a request and record it in the audit log.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` describing why no tree was rendered.
    pub async fn handle(&self, request: BuildRequest) -> Result<Visualization, DispatchError> {
        let validated = params::validate(&request.parameters);
        for anomaly in &validated.anomalies {
            tracing::info!("parameter replaced by default: {anomaly}");
        }

        let mut audit = PendingAudit {
            dispatcher: self,
            request: &request,
            validated: &validated,
            trail: AuditTrail {
                event: AuditEvent::Rejected,
                artifact: PathBuf::new(),
                size: 0,
            },
            succeeded: false,
        };
        let trail = &mut audit.trail;
        let result = match self.classify(&request) {
            Ok(Action::FreshBuild) => {
                trail.event = AuditEvent::Build;
                self.build(&request, validated.parameters, trail).await
            }
            Ok(Action::Continue { id, claims }) => {
                trail.event = AuditEvent::Continue;
                self.continue_session(id, &claims, &request, validated.parameters, trail)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("{} request failed: {e}", audit.trail.event.as_str());
        }
        audit.succeeded = result.is_ok();
        drop(audit);
        result
    }

    /// Record a view of the start page.
    pub fn record_start_view(&self, client: &ClientInfo) {
        self.audit.record(&AuditRecord {
            timestamp_ms: self.time.now_ms(),
            event: AuditEvent::StartPage,
            user_agent: client.user_agent.clone(),
            client_address: client.address.clone(),
            origin: String::new(),
            artifact: String::new(),
            size: AuditSize::Bytes(0),
            anomalies: Vec::new(),
        });
    }

    fn record(&self, request: &BuildRequest, validated: &Validated, trail: &AuditTrail, ok: bool) {
        self.audit.record(&AuditRecord {
            timestamp_ms: self.time.now_ms(),
            event: trail.event,
            user_agent: request.client.user_agent.clone(),
            client_address: request.client.address.clone(),
            origin: request.declared_origin.clone(),
            artifact: trail.artifact.display().to_string(),
            size: if ok {
                AuditSize::Bytes(trail.size)
            } else {
                AuditSize::Error
            },
            anomalies: validated.anomalies.clone(),
        });
    }

    /// Build a fresh tree in a newly allocated session.
    async fn build(
        &self,
        request: &BuildRequest,
        parameters: TreeParameters,
        trail: &mut AuditTrail,
    ) -> Result<Visualization, DispatchError> {
        let default_source = BuildSource::Sample(DEFAULT_SAMPLE.to_string());
        let source = self.check_source(request.source.as_ref().unwrap_or(&default_source))?;

        let guard = self.store.allocate()?;
        // Dropped before the guard, so the id is released while still locked.
        let mut reservation = BuildReservation {
            store: &self.store,
            id: guard.id(),
            keep: false,
        };
        let result = self.build_in(&guard, source, parameters, trail).await;

        reservation.keep = result.is_ok();
        drop(reservation);
        drop(guard);
        result
    }

    async fn build_in(
        &self,
        guard: &SessionGuard,
        source: StagedSource<'_>,
        parameters: TreeParameters,
        trail: &mut AuditTrail,
    ) -> Result<Visualization, DispatchError> {
        let id = guard.id();
        self.store.clear_artifacts(id)?;

        let input = match source {
            StagedSource::Upload(bytes) => {
                let path = self.store.layout().raw_input(id);
                std::fs::write(&path, bytes).map_err(|e| {
                    tracing::error!("failed to stage upload at {}: {e}", path.display());
                    DispatchError::UploadFailure("the upload could not be stored".to_string())
                })?;
                trail.size = bytes.len() as u64;
                path
            }
            StagedSource::Sample(path) => {
                trail.size = std::fs::metadata(&path).map_or(0, |metadata| metadata.len());
                path
            }
        };
        trail.artifact.clone_from(&input);

        let rendered = self
            .engine
            .invoke(
                guard,
                EngineAction::Build {
                    input: &input,
                    mode: parameters.build_mode,
                },
                &parameters,
            )
            .await?;

        self.store.renew(guard)?;
        let token = self
            .tokens
            .issue(id, guard.created_ms())
            .map_err(DispatchError::Token)?;

        tracing::info!(
            "built tree for session {id} (leaf size {}, fanout {}, {:?})",
            parameters.leaf_size,
            parameters.fanout,
            parameters.build_mode
        );
        Ok(Visualization {
            session_id: id,
            token,
            parameters,
            html: rendered.html,
            inserted: Vec::new(),
        })
    }

    /// Reject unusable sources before a session is allocated for them.
    fn check_source<'a>(&self, source: &'a BuildSource) -> Result<StagedSource<'a>, DispatchError> {
        match source {
            BuildSource::Upload { file_name, bytes } => {
                if bytes.is_empty() {
                    return Err(DispatchError::UploadFailure(format!(
                        "'{file_name}' is empty"
                    )));
                }
                if bytes.len() > self.max_upload_bytes {
                    return Err(DispatchError::UploadFailure(format!(
                        "'{file_name}' is larger than {} bytes",
                        self.max_upload_bytes
                    )));
                }
                Ok(StagedSource::Upload(bytes))
            }
            BuildSource::Sample(name) => self
                .samples
                .resolve(name)
                .map(StagedSource::Sample)
                .map_err(|e| DispatchError::UploadFailure(e.to_string())),
        }
    }

    /// Insert values into the tree of an existing session.
    async fn continue_session(
        &self,
        id: SessionId,
        claims: &SessionClaims,
        request: &BuildRequest,
        parameters: TreeParameters,
        trail: &mut AuditTrail,
    ) -> Result<Visualization, DispatchError> {
        let layout = self.store.layout();
        trail.artifact = layout.leaf_blocks(id);

        let Some(guard) = self.store.lock(id).await else {
            return Err(DispatchError::SessionExpiredOrMissing);
        };

        // The id may have been reallocated since the token was issued.
        let same_session = guard.created_ms() == claims.created_ms
            && self.store.created_at(id) == Some(claims.created_ms);
        if !same_session || !self.store.is_live(id) || !self.store.has_built_tree(id) {
            return Err(DispatchError::SessionExpiredOrMissing);
        }

        let values: Vec<String> = request
            .insert
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();

        let rendered = self
            .engine
            .invoke(&guard, EngineAction::Insert { values: &values }, &parameters)
            .await?;

        // The tree is committed; the TTL may have run out during the run.
        self.store.renew(&guard)?;
        trail.size = std::fs::metadata(&trail.artifact).map_or(0, |metadata| metadata.len());
        let token = self
            .tokens
            .issue(id, guard.created_ms())
            .map_err(DispatchError::Token)?;
        drop(guard);

        tracing::debug!("inserted {} values into session {id}", values.len());
        Ok(Visualization {
            session_id: id,
            token,
            parameters,
            html: rendered.html,
            inserted: values,
        })
    }
}
