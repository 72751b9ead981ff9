//! Admin control plane adapter driving the `radosgw-admin` CLI.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gatecheck_core::types::sub_user_id;
use gatecheck_core::{
    AccessLevel, AdapterError, AdapterResult, AdminConfig, BucketLimit, Credentials,
    IdentityAdmin,
};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// stderr fragments the CLI uses when the named user does not exist.
const NOT_FOUND_MARKERS: &[&str] = &["does not exist", "no user info saved", "No such"];

/// Captured result of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs admin CLI invocations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the admin command with `args` appended and captures its output.
    ///
    /// A nonzero exit is not an error at this level; failing to run at all is.
    async fn run(&self, args: &[String]) -> AdapterResult<CommandOutput>;
}

/// Spawns the configured admin program as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl ProcessRunner {
    /// Creates a runner from the admin configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Rejected`] if the configured command is empty.
    pub fn new(config: &AdminConfig, timeout: Duration) -> AdapterResult<Self> {
        let (program, leading_args) = config
            .command
            .split_first()
            .ok_or_else(|| AdapterError::rejected("InvalidConfig", "admin.command is empty"))?;
        Ok(Self { program: program.clone(), leading_args: leading_args.to_vec(), timeout })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[String]) -> AdapterResult<CommandOutput> {
        debug!(program = %self.program, ?args, "Running admin command");

        let child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AdapterError::Transport(format!("failed to spawn {}: {e}", self.program))
            })?;

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(AdapterError::Transport(format!(
                "failed to wait for {}: {e}",
                self.program
            ))),
            Err(_) => {
                warn!(program = %self.program, ?args, "Admin command timed out");
                Err(AdapterError::Transport(format!(
                    "{} timed out after {}ms",
                    self.program,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    user: String,
    access_key: String,
    secret_key: String,
}

/// [`IdentityAdmin`] backed by `radosgw-admin`.
#[derive(Debug, Clone)]
pub struct RadosgwAdmin<R> {
    runner: R,
}

impl<R: CommandRunner> RadosgwAdmin<R> {
    /// Creates an admin adapter issuing commands through `runner`.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    async fn exec(&self, args: Vec<String>) -> AdapterResult<String> {
        let output = self.runner.run(&args).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let stderr = output.stderr.trim();
        if NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker)) {
            return Err(AdapterError::NotFound(stderr.to_string()));
        }

        let code = output.status.map_or_else(|| "signal".to_string(), |c| format!("exit {c}"));
        Err(AdapterError::rejected(code, stderr))
    }

    /// Picks the key pair issued to `user` out of a user info document.
    fn key_for(stdout: &str, user: &str) -> AdapterResult<Credentials> {
        let info: UserInfo = serde_json::from_str(stdout)
            .map_err(|e| AdapterError::Malformed(format!("user info is not JSON: {e}")))?;
        info.keys
            .into_iter()
            .find(|k| k.user == user)
            .map(|k| Credentials::new(k.user, k.access_key, k.secret_key))
            .ok_or_else(|| AdapterError::Malformed(format!("no key issued for {user}")))
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

#[async_trait]
impl<R: CommandRunner> IdentityAdmin for RadosgwAdmin<R> {
    async fn create_principal(
        &self,
        user: &str,
        limit: BucketLimit,
    ) -> AdapterResult<Credentials> {
        let stdout = self
            .exec(args(&[
                "user",
                "create",
                &format!("--max-buckets={}", limit.as_flag()),
                &format!("--display-name={user}"),
                &format!("--uid={user}"),
            ]))
            .await?;
        Self::key_for(&stdout, user)
    }

    async fn create_sub_principal(
        &self,
        parent: &str,
        sub: &str,
        access: AccessLevel,
    ) -> AdapterResult<Credentials> {
        let stdout = self
            .exec(args(&[
                "subuser",
                "create",
                "--gen-access-key",
                "--key-type=s3",
                &format!("--uid={parent}"),
                &format!("--subuser={sub}"),
                &format!("--access={access}"),
            ]))
            .await?;
        Self::key_for(&stdout, &sub_user_id(parent, sub))
    }

    async fn remove_principal(&self, user: &str) -> AdapterResult<()> {
        self.exec(args(&["user", "rm", "--purge-data", &format!("--uid={user}")])).await?;
        Ok(())
    }

    async fn link_bucket(&self, bucket: &str, owner: &str) -> AdapterResult<()> {
        let bucket = format!("--bucket={bucket}");
        let owner = format!("--uid={owner}");
        self.exec(args(&["bucket", "link", &bucket, &owner])).await?;
        Ok(())
    }

    async fn set_bucket_quota(&self, owner: &str, max_size: u64) -> AdapterResult<()> {
        self.exec(args(&[
            "quota",
            "set",
            "--quota-scope=bucket",
            &format!("--uid={owner}"),
            &format!("--max-size={max_size}"),
        ]))
        .await?;
        Ok(())
    }

    async fn enable_bucket_quota(&self, owner: &str) -> AdapterResult<()> {
        self.exec(args(&["quota", "enable", "--quota-scope=bucket", &format!("--uid={owner}")]))
            .await?;
        Ok(())
    }
}
