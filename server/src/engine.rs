//! External tree engine invocation.
//!
//! The engine is a separately built program that creates, mutates and renders
//! a B+-tree stored in block files. Each dispatched action runs it exactly
//! once:
//!
//! ```text
//! engine --session <prefix> --leaf-size <n> --fanout <n>
//!        [--input <path> | --insert "<value> <value>..."]
//!        (--bulk-load | --incremental) [--render-html]
//! ```
//!
//! # Invariants
//!
//! - Arguments are passed as a discrete vector; no shell ever parses them.
//!   Values to insert travel together in the single argument after
//!   `--insert`, separated by single spaces.
//! - The engine only ever writes to the session's staging prefix. Live block
//!   files are replaced by rename after a successful run, so a failed or
//!   timed-out run leaves the session exactly as it was.
//! - Holding a [`SessionGuard`] is required to invoke the engine.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::params::{BuildMode, TreeParameters};
use crate::session::{ArtifactLayout, SessionGuard, SessionId};

/// Maximum number of stderr characters kept in an error.
const STDERR_EXCERPT_CHARS: usize = 512;

/// How to run the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments placed before the engine arguments, e.g. a script path when
    /// `program` is an interpreter.
    pub leading_args: Vec<OsString>,
    /// Upper bound on a single run.
    pub timeout: Duration,
    /// Ask the engine to print its HTML rendering on stdout.
    pub render_html: bool,
}

impl EngineConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    #[must_use]
    pub const fn new(program: PathBuf) -> Self {
        Self {
            program,
            leading_args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            render_html: true,
        }
    }
}

/// What the engine should do.
#[derive(Debug, Clone, Copy)]
pub enum EngineAction<'a> {
    /// Build a fresh tree from the values in `input`.
    Build { input: &'a Path, mode: BuildMode },
    /// Insert `values` into the existing tree, in order.
    ///
    /// An empty slice re-renders the tree unchanged. Values must not contain
    /// whitespace.
    Insert { values: &'a [String] },
}

/// A successful engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Whatever the engine printed on stdout; HTML when rendering is enabled.
    pub html: String,
}

/// Error returned when the engine could not run or produced no output.
#[derive(Debug)]
pub enum EngineError {
    /// The process could not be started.
    Spawn(io::Error),
    /// The process did not finish within the timeout and was killed.
    TimedOut(Duration),
    /// The process exited unsuccessfully.
    Failed {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        stderr: String,
    },
    /// The process exited successfully but did not write these artifacts.
    MissingArtifacts(Vec<PathBuf>),
    /// Preparing or committing the staged block files failed.
    Staging(io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start engine: {e}"),
            Self::TimedOut(timeout) => {
                write!(f, "engine did not finish within {}ms", timeout.as_millis())
            }
            Self::Failed { code: Some(code), stderr } => {
                write!(f, "engine exited with status {code}: {stderr}")
            }
            Self::Failed { code: None, stderr } => {
                write!(f, "engine was terminated by a signal: {stderr}")
            }
            Self::MissingArtifacts(paths) => {
                let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "engine did not produce {}", names.join(", "))
            }
            Self::Staging(e) => write!(f, "failed to stage engine output: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) | Self::Staging(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs the external engine against session artifacts.
#[derive(Debug, Clone)]
pub struct EngineInvoker {
    config: EngineConfig,
    layout: ArtifactLayout,
}

impl EngineInvoker {
    #[must_use]
    pub const fn new(config: EngineConfig, layout: ArtifactLayout) -> Self {
        Self { config, layout }
    }

    /// Build the engine argument vector for `action` on session `id`.
    #[must_use]
    pub fn arguments(
        &self,
        id: SessionId,
        action: EngineAction<'_>,
        params: &TreeParameters,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--session".into(),
            self.layout.staging_prefix(id).into_os_string(),
            "--leaf-size".into(),
            params.leaf_size.to_string().into(),
            "--fanout".into(),
            params.fanout.to_string().into(),
        ];

        let mode = match action {
            EngineAction::Build { input, mode } => {
                args.push("--input".into());
                args.push(input.as_os_str().to_owned());
                mode
            }
            EngineAction::Insert { values } => {
                if !values.is_empty() {
                    args.push("--insert".into());
                    args.push(values.join(" ").into());
                }
                BuildMode::Insert
            }
        };
        args.push(match mode {
            BuildMode::Insert => "--incremental".into(),
            BuildMode::BulkLoad => "--bulk-load".into(),
        });

        if self.config.render_html {
            args.push("--render-html".into());
        }
        args
    }

    /// Run the engine once and commit its output.
    ///
    /// # Pre-conditions
    ///
    /// - For `Insert`, the session's leaf-block artifact exists.
    ///
    /// # Post-conditions
    ///
    /// - On success, the live leaf and node block files hold the engine's output.
    /// - On failure, the live block files are unchanged and no staging files remain.
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` describing why no output was produced.
    pub async fn invoke(
        &self,
        guard: &SessionGuard,
        action: EngineAction<'_>,
        params: &TreeParameters,
    ) -> Result<Rendered, EngineError> {
        let id = guard.id();
        self.discard_staging(id);

        if let EngineAction::Insert { .. } = action {
            if let Err(e) = self.stage_existing(id) {
                self.discard_staging(id);
                return Err(EngineError::Staging(e));
            }
        }

        let result = self.run(id, action, params).await;
        let result = match result {
            Ok(rendered) => self.commit(id).map(|()| rendered),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("engine run for session {id} failed: {e}");
            self.discard_staging(id);
        }
        result
    }

    async fn run(
        &self,
        id: SessionId,
        action: EngineAction<'_>,
        params: &TreeParameters,
    ) -> Result<Rendered, EngineError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.leading_args)
            .args(self.arguments(id, action, params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("invoking engine for session {id}: {action:?}");

        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(EngineError::Spawn(e)),
            Err(_) => return Err(EngineError::TimedOut(self.config.timeout)),
        };

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(STDERR_EXCERPT_CHARS)
                .collect();
            return Err(EngineError::Failed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let missing: Vec<PathBuf> = [
            self.layout.staged_leaf_blocks(id),
            self.layout.staged_node_blocks(id),
        ]
        .into_iter()
        .filter(|path| !path.exists())
        .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingArtifacts(missing));
        }

        Ok(Rendered {
            html: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    /// Copy the live block files to the staging prefix.
    fn stage_existing(&self, id: SessionId) -> io::Result<()> {
        std::fs::copy(
            self.layout.leaf_blocks(id),
            self.layout.staged_leaf_blocks(id),
        )?;
        let node_blocks = self.layout.node_blocks(id);
        if node_blocks.exists() {
            std::fs::copy(node_blocks, self.layout.staged_node_blocks(id))?;
        }
        Ok(())
    }

    /// Move staged block files over the live ones.
    ///
    /// The leaf blocks go last. Until they are in place the previous node
    /// blocks are kept aside, and are put back if either rename fails.
    fn commit(&self, id: SessionId) -> Result<(), EngineError> {
        let node_blocks = self.layout.node_blocks(id);
        let previous = self.layout.previous_node_blocks(id);
        let had_node_blocks = node_blocks.exists();
        if had_node_blocks {
            std::fs::rename(&node_blocks, &previous).map_err(EngineError::Staging)?;
        }

        let renamed = std::fs::rename(self.layout.staged_node_blocks(id), &node_blocks).and_then(
            |()| {
                std::fs::rename(
                    self.layout.staged_leaf_blocks(id),
                    self.layout.leaf_blocks(id),
                )
            },
        );

        if let Err(e) = renamed {
            let restored = if had_node_blocks {
                std::fs::rename(&previous, &node_blocks)
            } else {
                remove_if_exists(&node_blocks)
            };
            if let Err(restore_error) = restored {
                tracing::error!(
                    "failed to restore node blocks of session {id} after a failed commit: {restore_error}"
                );
            }
            return Err(EngineError::Staging(e));
        }

        if had_node_blocks {
            if let Err(e) = remove_if_exists(&previous) {
                tracing::warn!("failed to remove {}: {e}", previous.display());
            }
        }
        Ok(())
    }

    fn discard_staging(&self, id: SessionId) {
        for path in [
            self.layout.staged_leaf_blocks(id),
            self.layout.staged_node_blocks(id),
        ] {
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!("failed to remove staging file {}: {e}", path.display());
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
