//! Test doubles shared by unit and end-to-end tests.
//!
//! `FakeEngine` writes a small POSIX shell script that speaks the engine's
//! command-line protocol. It is executed through `/bin/sh` rather than
//! directly, which avoids "text file busy" races when tests spawn it while
//! other threads are writing scripts.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::engine::EngineConfig;

/// What the fake engine does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineBehavior {
    /// Builds from `--input`, appends each `--insert` value, prints HTML.
    Working,
    /// Like `Working`, after sleeping for one second.
    Slow,
    /// Writes to stderr and exits with status 1.
    Failing,
    /// Sleeps far longer than any test timeout.
    Hanging,
    /// Exits successfully without writing any block file.
    Silent,
}

const WORKING_SCRIPT: &str = r#"
set -f
prev=""
prefix=""
input=""
for a in "$@"; do
  case "$prev" in
    --session) prefix="$a" ;;
    --input) input="$a" ;;
  esac
  prev="$a"
done
[ -n "$prefix" ] || exit 2
if [ -n "$input" ]; then
  cat "$input" > "$prefix.l.blk" || exit 3
  echo "root" > "$prefix.n.blk"
fi
prev=""
for a in "$@"; do
  if [ "$prev" = "--insert" ]; then
    for v in $a; do
      printf '%s\n' "$v" >> "$prefix.l.blk"
      echo "split-check" >> "$prefix.n.blk"
    done
  fi
  prev="$a"
done
echo '<table class="btree"><tr><td>rendered</td></tr></table>'
"#;

const FAILING_SCRIPT: &str = r#"
echo "engine exploded" >&2
exit 1
"#;

const HANGING_SCRIPT: &str = "exec sleep 30\n";

const SILENT_SCRIPT: &str = "exit 0\n";

/// Records every invocation, one line per run, as `[arg][arg]...`.
const LOGGING_PREAMBLE: &str = r#"
line=""
for a in "$@"; do line="$line[$a]"; done
printf '%s\n' "$line" >> "$(dirname "$0")/invocations.log"
"#;

/// A scripted stand-in for the external engine.
pub struct FakeEngine {
    dir: TempDir,
    script: PathBuf,
}

impl FakeEngine {
    #[must_use]
    pub fn new(behavior: EngineBehavior) -> Self {
        let dir = tempfile::tempdir().expect("create engine dir");
        let script = dir.path().join("engine.sh");
        let body = match behavior {
            EngineBehavior::Working => WORKING_SCRIPT.to_string(),
            EngineBehavior::Slow => format!("sleep 1\n{WORKING_SCRIPT}"),
            EngineBehavior::Failing => FAILING_SCRIPT.to_string(),
            EngineBehavior::Hanging => HANGING_SCRIPT.to_string(),
            EngineBehavior::Silent => SILENT_SCRIPT.to_string(),
        };
        std::fs::write(&script, format!("{LOGGING_PREAMBLE}{body}")).expect("write engine script");
        Self { dir, script }
    }

    /// Engine configuration that runs this script.
    #[must_use]
    pub fn config(&self, timeout: Duration) -> EngineConfig {
        EngineConfig {
            program: PathBuf::from("/bin/sh"),
            leading_args: vec![OsString::from(self.script.as_os_str())],
            timeout,
            render_html: true,
        }
    }

    /// Argument vectors of every run so far, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<Vec<String>> {
        let Ok(log) = std::fs::read_to_string(self.dir.path().join("invocations.log")) else {
            return Vec::new();
        };
        log.lines()
            .map(|line| {
                let inner = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .unwrap_or_default();
                if inner.is_empty() {
                    Vec::new()
                } else {
                    inner.split("][").map(String::from).collect()
                }
            })
            .collect()
    }
}
