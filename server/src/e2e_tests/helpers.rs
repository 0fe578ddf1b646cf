//! Common helpers for end-to-end tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::audit::AuditLog;
use crate::auth::{SessionTokens, TokenConfig};
use crate::dispatcher::{BuildRequest, BuildSource, ClientInfo, Dispatcher, RequestOrigin, Visualization};
use crate::engine::EngineInvoker;
use crate::params::RawParameters;
use crate::samples::{SAMPLES, SampleCatalog};
use crate::session::{ArtifactLayout, SessionConfig, SessionStore};
use crate::testing::{EngineBehavior, FakeEngine};
use crate::time::{SimulatedTimeSource, TimeSource};

pub const MAX_UPLOAD_BYTES: usize = 1024;
pub const SAMPLE_VALUES: &str = "42 7 19 3 88\n";

/// A dispatcher wired to scratch directories, a fake engine and a
/// simulated clock. Everything is removed on drop.
pub struct TestHarness {
    pub dir: TempDir,
    pub engine: FakeEngine,
    pub time: Arc<SimulatedTimeSource>,
    pub dispatcher: Dispatcher,
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with(EngineBehavior::Working, SessionConfig::default())
    }

    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn with(behavior: EngineBehavior, session_config: SessionConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let sample_dir = dir.path().join("samples");
        std::fs::create_dir_all(&sample_dir).expect("Failed to create sample dir");
        for sample in SAMPLES {
            std::fs::write(sample_dir.join(sample.name), SAMPLE_VALUES)
                .expect("Failed to write sample");
        }

        let time = Arc::new(SimulatedTimeSource::default_start());
        let shared_time: Arc<dyn TimeSource> = Arc::clone(&time) as Arc<dyn TimeSource>;
        let layout = ArtifactLayout::new(dir.path().join("sessions"));
        let store = SessionStore::open_seeded(
            layout.clone(),
            session_config,
            Arc::clone(&shared_time),
            7,
        )
        .expect("Failed to open session store");

        let engine = FakeEngine::new(behavior);
        let token_config = TokenConfig::new_hs256(b"e2e-test-secret".to_vec(), 86_400)
            .expect("Failed to create token config");

        let dispatcher = Dispatcher::new(
            Arc::new(store),
            EngineInvoker::new(engine.config(Duration::from_secs(10)), layout),
            SessionTokens::new(&token_config, Arc::clone(&shared_time)),
            SampleCatalog::new(sample_dir),
            AuditLog::new(Some(dir.path().join("audit.log"))),
            MAX_UPLOAD_BYTES,
            shared_time,
        );

        Self {
            dir,
            engine,
            time,
            dispatcher,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        self.dispatcher.store().layout()
    }

    #[must_use]
    pub fn sample_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("samples").join(name)
    }

    /// Lines of the audit log, oldest first.
    #[must_use]
    pub fn audit_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("audit.log"))
            .map(|log| log.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Names of every file in the session directory, sorted.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn session_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.layout().directory())
            .expect("Failed to read session dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Build a tree from the default sample and return its visualization.
    #[allow(clippy::expect_used)]
    pub async fn build(&self) -> Visualization {
        self.dispatcher
            .handle(start_request(None, "40", "10", "i"))
            .await
            .expect("Fresh build should succeed")
    }
}

pub fn client() -> ClientInfo {
    ClientInfo {
        user_agent: "e2e-agent/1.0".to_string(),
        address: "192.0.2.1".to_string(),
    }
}

/// A request as the start form submits it.
#[must_use]
pub fn start_request(source: Option<BuildSource>, lns: &str, fan: &str, blm: &str) -> BuildRequest {
    BuildRequest {
        origin: RequestOrigin::StartPage,
        declared_origin: "start".to_string(),
        declared_session_id: None,
        session_token: None,
        parameters: RawParameters {
            leaf_size: Some(lns.to_string()),
            fanout: Some(fan.to_string()),
            build_mode: Some(blm.to_string()),
        },
        insert: None,
        source,
        client: client(),
    }
}

/// A request as the continue form on `visualization`'s result page submits it.
#[must_use]
pub fn continue_request(visualization: &Visualization, insert: &str) -> BuildRequest {
    let parameters = visualization.parameters;
    BuildRequest {
        origin: RequestOrigin::VisualizePage,
        declared_origin: "btree".to_string(),
        declared_session_id: Some(visualization.session_id.to_string()),
        session_token: Some(visualization.token.clone()),
        parameters: RawParameters {
            leaf_size: Some(parameters.leaf_size.to_string()),
            fanout: Some(parameters.fanout.to_string()),
            build_mode: Some(parameters.build_mode.form_value().to_string()),
        },
        insert: Some(insert.to_string()),
        source: None,
        client: client(),
    }
}

/// Number of times `flag` appears in an argument vector.
#[must_use]
pub fn count_flag(args: &[String], flag: &str) -> usize {
    args.iter().filter(|arg| arg.as_str() == flag).count()
}
