use crate::lsp::error::{LspError, Result};
use crate::lsp::stdio_transport::StdioTransport;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Environment handed to the child: a base snapshot overlaid by overrides.
///
/// The two layers are kept apart until spawn so the harness never mutates its
/// own process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    base: BTreeMap<OsString, OsString>,
    overrides: BTreeMap<OsString, OsString>,
}

impl EnvOverlay {
    /// Snapshot the current process environment as the base layer.
    pub fn inherit() -> Self {
        EnvOverlay {
            base: std::env::vars_os().collect(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Combined environment; overrides win on key collision.
    pub fn resolve(&self) -> BTreeMap<OsString, OsString> {
        let mut env = self.base.clone();
        env.extend(
            self.overrides
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: EnvOverlay,
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessConfig {
            program: program.into(),
            args: vec!["lsp".to_string(), "--stdio".to_string()],
            env: EnvOverlay::inherit(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }
}

/// A running language server and the three pipes wired to it.
///
/// The child is killed when this value is dropped, so every exit path
/// releases the process and closes the pipes.
pub struct ServerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: ChildStderr,
}

impl ServerProcess {
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        for a in &config.args {
            cmd.arg(a);
        }

        let mut child = cmd
            .env_clear()
            .envs(config.env.resolve())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LspError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(LspError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(LspError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LspError::MissingPipe("stderr"))?;

        info!(
            program = %config.program.display(),
            args = ?config.args,
            pid = child.id(),
            "spawned server"
        );

        Ok(ServerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr,
        })
    }

    /// Borrow stdin/stdout as a framed transport for one exchange.
    pub fn transport(&mut self) -> StdioTransport<&mut ChildStdin, &mut BufReader<ChildStdout>> {
        StdioTransport::new(&mut self.stdin, &mut self.stdout)
    }

    /// Read up to `max_bytes` of the child's stderr, giving up after `wait`.
    ///
    /// Whatever arrived before the bound elapsed is returned.
    ///
    /// Stderr is only read here, after the exchange. A server that logs more
    /// than the pipe buffer (64 KiB on Linux) before answering blocks on its
    /// stderr write and the request hangs until its deadline; lower the
    /// server's log level (`--server-log`) for such servers.
    pub async fn drain_stderr(&mut self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(max_bytes.min(64 * 1024));
        let mut limited = (&mut self.stderr).take(max_bytes as u64);
        let read = limited.read_to_end(&mut buffer);

        let outcome = tokio::time::timeout(wait, read).await;
        match outcome {
            Ok(result) => {
                result?;
            }
            Err(_) => debug!(
                bytes = buffer.len(),
                "stderr drain stopped after {:?}", wait
            ),
        }
        Ok(buffer)
    }

    /// Ask the child to stop and release all pipes. The exit status is not collected.
    pub fn terminate(mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => {
                debug!(pid = self.child.id(), "kill requested");
                Ok(())
            }
            // already exited and reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                warn!("server already exited: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_base() {
        let env = EnvOverlay {
            base: [("RUST_LOG", "info"), ("HOME", "/home/x")]
                .into_iter()
                .map(|(k, v)| (OsString::from(k), OsString::from(v)))
                .collect(),
            overrides: BTreeMap::new(),
        }
        .with_override("RUST_LOG", "trace")
        .with_override("EXTRA", "1");

        let resolved = env.resolve();
        assert_eq!(resolved.get(&OsString::from("RUST_LOG")), Some(&OsString::from("trace")));
        assert_eq!(resolved.get(&OsString::from("HOME")), Some(&OsString::from("/home/x")));
        assert_eq!(resolved.get(&OsString::from("EXTRA")), Some(&OsString::from("1")));
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn test_inherit_leaves_host_environment_alone() {
        let before: Vec<_> = std::env::vars_os().collect();
        let env = EnvOverlay::inherit().with_override("LSP_HANDSHAKE_TEST_ONLY", "1");

        assert!(env.resolve().contains_key(&OsString::from("LSP_HANDSHAKE_TEST_ONLY")));
        assert!(std::env::var_os("LSP_HANDSHAKE_TEST_ONLY").is_none());
        assert_eq!(before.len(), std::env::vars_os().count());
    }

    #[test]
    fn test_default_args() {
        let config = ProcessConfig::new("t-linter");
        assert_eq!(config.args, vec!["lsp", "--stdio"]);

        let config = config.with_args(["serve"]);
        assert_eq!(config.args, vec!["serve"]);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let config = ProcessConfig::new("/nonexistent/lsp-handshake-server");
        match ServerProcess::spawn(&config) {
            Err(LspError::Spawn { program, .. }) => {
                assert_eq!(program, PathBuf::from("/nonexistent/lsp-handshake-server"));
            }
            Err(other) => panic!("expected Spawn error, got {:?}", other),
            Ok(_) => panic!("spawn unexpectedly succeeded"),
        }
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::lsp::transport::LspTransport;
        use crate::lsp::types::{Message, Outcome, Request, RequestId};
        use std::time::Instant;

        fn sh(script: &str) -> ProcessConfig {
            ProcessConfig::new("sh").with_args(["-c", script])
        }

        #[tokio::test]
        async fn test_exchange_over_child_pipes() {
            let config = sh(concat!(
                r#"read -r line; printf 'Content-Length: 36\r\n\r\n{"jsonrpc":"2.0","id":1,"result":{}}'; "#,
                "exec cat >/dev/null"
            ));
            let mut server = ServerProcess::spawn(&config).expect("spawn failed");

            let mut transport = server.transport();
            let request = Request::new(1, "initialize", serde_json::json!({}));
            transport.send(&request.into()).await.expect("send failed");
            let reply = transport.receive().await.expect("receive failed");

            match reply {
                Message::Response(response) => {
                    assert_eq!(response.id, Some(RequestId::Number(1)));
                    assert_eq!(response.outcome, Outcome::Result(serde_json::json!({})));
                }
                other => panic!("expected response, got {:?}", other),
            }

            server.terminate().expect("terminate failed");
        }

        #[tokio::test]
        async fn test_drain_stderr_is_bounded_on_silent_child() {
            let mut server = ServerProcess::spawn(&sh("exec cat")).expect("spawn failed");

            let started = Instant::now();
            let output = server
                .drain_stderr(1024, Duration::from_millis(100))
                .await
                .expect("drain failed");

            assert!(output.is_empty());
            assert!(started.elapsed() < Duration::from_secs(5));
            server.terminate().expect("terminate failed");
        }

        #[tokio::test]
        async fn test_drain_stderr_caps_at_max_bytes() {
            let mut server =
                ServerProcess::spawn(&sh("printf 'abcdefghij' >&2; exec cat")).expect("spawn failed");

            let output = server
                .drain_stderr(4, Duration::from_secs(5))
                .await
                .expect("drain failed");

            assert_eq!(output, b"abcd");
            server.terminate().expect("terminate failed");
        }

        #[tokio::test]
        async fn test_drain_stderr_keeps_output_read_before_bound() {
            let mut server =
                ServerProcess::spawn(&sh("printf 'partial' >&2; exec cat")).expect("spawn failed");

            let output = server
                .drain_stderr(1024, Duration::from_millis(300))
                .await
                .expect("drain failed");

            assert_eq!(output, b"partial");
            server.terminate().expect("terminate failed");
        }

        #[tokio::test]
        async fn test_child_sees_env_overrides() {
            let env = EnvOverlay::inherit().with_override("LSP_HANDSHAKE_PROBE", "from-override");
            let config = sh(r#"printf '%s' "$LSP_HANDSHAKE_PROBE" >&2"#).with_env(env);
            let mut server = ServerProcess::spawn(&config).expect("spawn failed");

            let output = server
                .drain_stderr(1024, Duration::from_secs(5))
                .await
                .expect("drain failed");

            assert_eq!(String::from_utf8_lossy(&output), "from-override");
            server.terminate().expect("terminate failed");
        }
    }
}
