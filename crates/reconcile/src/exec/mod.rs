//! External tool execution.
//!
//! Tool output is streamed into [`Status::Running`] updates carrying the
//! transcript so far, then closed with an Applied or Failed update. Every
//! `apt-get` invocation goes through one package lock: concurrent dpkg
//! runs corrupt their own lock file, so installs, removals, upgrades and
//! list refreshes are strictly serialised. Read-only queries skip the lock.

mod terminal;

pub use terminal::TerminalWriter;

use crate::error::{Error, Result};
use crate::status::{Detail, Reporter, Status, Terminal};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, mpsc, watch};

/// Info reported while another package operation holds the lock
pub const WAITING_FOR_DPKG: &str = "Waiting for dpkg to be available";

/// Programs the executor drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub apt_get: String,
    pub apt_cache: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            apt_get: "apt-get".to_string(),
            apt_cache: "apt-cache".to_string(),
        }
    }
}

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, echoed in the command line
    pub env: Vec<(String, String)>,
}

impl ExecRequest {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like echo of the invocation, as shown above the transcript.
    pub fn command_line(&self) -> String {
        let mut line = String::from("root# ");
        for (key, value) in &self.env {
            line.push_str(key);
            line.push('=');
            line.push_str(value);
            line.push(' ');
        }
        line.push_str(&self.program);
        line.push(' ');
        for arg in &self.args {
            if arg.contains('"') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
            line.push(' ');
        }
        line.push('\n');
        line
    }
}

/// Info strings reported while running, on success and on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Messages {
    pub running: String,
    pub success: String,
    pub failure: String,
}

impl Messages {
    pub fn new(
        running: impl Into<String>,
        success: impl Into<String>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            running: running.into(),
            success: success.into(),
            failure: failure.into(),
        }
    }
}

/// Runs external tools and owns the package lock.
#[derive(Debug)]
pub struct Executor {
    tools: Tools,
    package_lock: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl Executor {
    pub fn new(tools: Tools) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            tools,
            package_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Counter bumped after every successful `apt-get` run.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Run `request`, streaming its output to `reporter`. Returns whether
    /// the program exited successfully.
    pub async fn run(
        &self,
        request: &ExecRequest,
        messages: &Messages,
        reporter: &Reporter,
    ) -> bool {
        let command = request.command_line();
        let terminal = |output: String| {
            Some(Detail::Terminal(Terminal {
                command: command.clone(),
                output,
            }))
        };

        log::debug!("running {}", command.trim_end());
        let spawned = tokio::process::Command::new(&request.program)
            .args(&request.args)
            .env("LANG", "C.UTF-8")
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let err = Error::Spawn {
                    program: request.program.clone(),
                    source,
                };
                log::warn!("{err}");
                reporter.report(Status::Failed, &messages.failure, terminal(format!("{err}\n")));
                return false;
            }
        };

        let (tx, mut chunks) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let mut writer = TerminalWriter::new();
        while let Some(chunk) = chunks.recv().await {
            writer.write(&chunk, |output| {
                reporter.report(Status::Running, &messages.running, terminal(output.to_string()));
            });
        }

        let exit = child.wait().await;
        let output = writer.finish();
        match exit {
            Ok(exit) if exit.success() => {
                reporter.report(Status::Applied, &messages.success, terminal(output));
                true
            }
            Ok(exit) => {
                log::warn!("{} exited with {exit}", request.program);
                reporter.report(Status::Failed, &messages.failure, terminal(output));
                false
            }
            Err(err) => {
                log::warn!("waiting for {}: {err}", request.program);
                reporter.report(Status::Failed, &messages.failure, terminal(output));
                false
            }
        }
    }

    /// `apt-get --yes --quiet <command> <args>` under the package lock.
    pub async fn apt_get(
        &self,
        messages: &Messages,
        reporter: &Reporter,
        command: &str,
        args: &[String],
    ) -> bool {
        let _guard = match self.package_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                reporter.report(Status::Running, WAITING_FOR_DPKG, None);
                self.package_lock.lock().await
            }
        };

        let mut full = vec!["--yes".to_string(), "--quiet".to_string(), command.to_string()];
        full.extend(args.iter().cloned());
        let request =
            ExecRequest::new(&self.tools.apt_get, full).env("DEBIAN_FRONTEND", "noninteractive");

        let ok = self.run(&request, messages, reporter).await;
        if ok {
            self.changes.send_modify(|n| *n += 1);
        }
        ok
    }

    /// Output of `apt-cache dumpavail`. Read-only, no lock taken.
    pub async fn apt_cache_dumpavail(&self) -> Result<String> {
        let output = tokio::process::Command::new(&self.tools.apt_cache)
            .arg("dumpavail")
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: self.tools.apt_cache.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::ToolFailed {
                program: self.tools.apt_cache.clone(),
                status: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}
