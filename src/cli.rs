use crate::lsp::process::{EnvOverlay, ProcessConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub process: ProcessConfig,
    pub timeout: Option<Duration>,
    pub stderr_bytes: usize,
    pub stderr_wait: Duration,
    pub send_process_id: bool,
    pub shutdown: bool,
}

#[derive(Parser, Debug)]
#[command(name = "lsp-handshake")]
#[command(about = "Launch a language server over stdio and check its initialize handshake", long_about = None)]
pub struct Cli {
    /// Language server executable
    pub server: PathBuf,

    /// Arguments for the server (default: lsp --stdio)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Extra environment for the server, wins over inherited values
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// RUST_LOG value passed to the server. Stderr is read only after the
    /// response, so a server logging more than a pipe buffer first can stall
    #[arg(long, default_value = "trace")]
    pub server_log: String,

    /// Give up on a response after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[arg(long, default_value_t = 1024)]
    pub stderr_bytes: usize,

    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub stderr_wait_ms: u64,

    /// Send this process's pid in initialize instead of null
    #[arg(long)]
    pub process_id: bool,

    /// Finish with initialized, shutdown and exit after a successful initialize
    #[arg(long)]
    pub shutdown: bool,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        let mut env = EnvOverlay::inherit().with_override("RUST_LOG", self.server_log);
        for (key, value) in self.env {
            env = env.with_override(key, value);
        }

        let mut process = ProcessConfig::new(self.server).with_env(env);
        if !self.server_args.is_empty() {
            process = process.with_args(self.server_args);
        }

        Config {
            process,
            timeout: self.timeout.map(Duration::from_secs),
            stderr_bytes: self.stderr_bytes,
            stderr_wait: Duration::from_millis(self.stderr_wait_ms),
            send_process_id: self.process_id,
            shutdown: self.shutdown,
        }
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_defaults() {
        let config = Cli::try_parse_from(["lsp-handshake", "./target/release/t-linter"])
            .unwrap()
            .into_config();

        assert_eq!(config.process.program, PathBuf::from("./target/release/t-linter"));
        assert_eq!(config.process.args, vec!["lsp", "--stdio"]);
        assert_eq!(config.timeout, None);
        assert_eq!(config.stderr_bytes, 1024);
        assert_eq!(config.stderr_wait, Duration::from_millis(500));
        assert!(!config.send_process_id);
        assert!(!config.shutdown);
        assert_eq!(
            config.process.env.resolve().get(&OsString::from("RUST_LOG")),
            Some(&OsString::from("trace"))
        );
    }

    #[test]
    fn test_server_args_and_env_overrides() {
        let config = Cli::try_parse_from([
            "lsp-handshake",
            "--env",
            "RUST_LOG=debug",
            "-e",
            "FOO=a=b",
            "--timeout",
            "3",
            "sh",
            "--",
            "-c",
            "exec cat",
        ])
        .unwrap()
        .into_config();

        assert_eq!(config.process.args, vec!["-c", "exec cat"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));

        let env = config.process.env.resolve();
        assert_eq!(env.get(&OsString::from("RUST_LOG")), Some(&OsString::from("debug")));
        assert_eq!(env.get(&OsString::from("FOO")), Some(&OsString::from("a=b")));
    }

    #[test]
    fn test_rejects_bad_env_pair() {
        assert!(Cli::try_parse_from(["lsp-handshake", "--env", "NOEQUALS", "srv"]).is_err());
        assert!(Cli::try_parse_from(["lsp-handshake", "--env", "=x", "srv"]).is_err());
    }
}
