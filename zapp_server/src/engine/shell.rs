//! Shell engine: checks out the requested revision and runs the build
//! command in the repository's working copy.
//!
//! The build command runs through `sh -c`. Scheme, destination and revision
//! are passed as environment variables, never interpolated into the command
//! line, so the default `xcodebuild` invocation quotes them itself.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::ZappConfig;
use crate::engine::{BuildOutcome, BuildRequest, ExecutionEngine, LogSink};
use crate::models::build::is_valid_revision;

pub const DEFAULT_BUILD_COMMAND: &str =
    r#"xcodebuild -scheme "$ZAPP_SCHEME" -destination "$ZAPP_DESTINATION" build"#;

pub struct ShellEngine {
    build_command: String,
    timeout: Duration,
}

impl ShellEngine {
    pub fn new(build_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            build_command: build_command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ZappConfig) -> Self {
        Self::new(
            config.build_command.clone(),
            Duration::from_secs(config.build_timeout_secs),
        )
    }

    async fn execute(&self, request: &BuildRequest, log: &LogSink) -> Result<(), String> {
        let work_dir = &request.repository.local_path;

        if let Some(revision) = &request.revision {
            if !is_valid_revision(revision) {
                return Err(format!("invalid revision {revision:?}"));
            }
            let steps: [&[&str]; 3] = [
                &["fetch", "--all"],
                &["checkout", revision.as_str()],
                &["submodule", "update", "--init", "--recursive"],
            ];
            for args in steps {
                log.append(format!("$ git {}", args.join(" "))).await;
                let mut cmd = Command::new("git");
                cmd.args(args).current_dir(work_dir);
                let code = run_streaming(cmd, log).await?;
                if code != 0 {
                    return Err(format!("git {} exited with status {code}", args[0]));
                }
            }
        }

        let mut cmd = Command::new("sh");
        cmd.args(["-c", &self.build_command])
            .current_dir(work_dir)
            .env("CI", "true")
            .env("ZAPP_SCHEME", &request.scheme)
            .env("ZAPP_DESTINATION", request.platform.destination())
            .env("ZAPP_REVISION", request.revision.as_deref().unwrap_or("HEAD"));
        if let Some(build_id) = request.build_id {
            cmd.env("ZAPP_BUILD_ID", build_id.to_string());
        }

        tracing::info!(
            build_id = request.build_id,
            repository = %request.repository.name,
            scheme = %request.scheme,
            command = %self.build_command,
            "Running build command"
        );

        match run_streaming(cmd, log).await? {
            0 => Ok(()),
            code => Err(format!("build command exited with status {code}")),
        }
    }
}

#[async_trait]
impl ExecutionEngine for ShellEngine {
    async fn run(
        &self,
        request: BuildRequest,
        log: LogSink,
        cancel: CancellationToken,
    ) -> BuildOutcome {
        // Dropping the work future kills the command's process group.
        tokio::select! {
            _ = cancel.cancelled() => BuildOutcome::Canceled,
            result = tokio::time::timeout(self.timeout, self.execute(&request, &log)) => {
                match result {
                    Ok(Ok(())) => BuildOutcome::Succeeded,
                    Ok(Err(reason)) => BuildOutcome::failed(reason),
                    Err(_) => BuildOutcome::failed(format!(
                        "build timed out after {}s",
                        self.timeout.as_secs()
                    )),
                }
            }
        }
    }

    fn name(&self) -> &str {
        "shell"
    }
}

/// Spawn `cmd`, forward stdout and stderr line by line, return the exit code.
///
/// The command gets its own process group, killed once the command exits or
/// the returned future is dropped.
async fn run_streaming(mut cmd: Command, log: &LogSink) -> Result<i32, String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to execute command: {e}"))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut group = ProcessGroup(child.id());
    let exit = async move {
        let status = child.wait().await;
        // Leftover background processes would keep the pipes open.
        group.kill();
        status
    };

    let (_, _, status) = tokio::join!(forward(stdout, log), forward(stderr, log), exit);
    let status = status.map_err(|e| format!("failed to wait for command: {e}"))?;
    Ok(status.code().unwrap_or(-1))
}

/// Process group led by a spawned command, killed on drop.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        let Some(pid) = self.0.take() else { return };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH when every member already exited.
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn forward<R: AsyncRead + Unpin>(reader: Option<R>, log: &LogSink) {
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log.append(line).await;
    }
}
