//! OS-level helper process control
//!
//! Browser sessions leave driver processes behind when they crash. Teardown
//! therefore kills every process with the helper's name, tracked or not.

use std::io;
use std::process::{Command as StdCommand, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Find and kill processes by name
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Ids of running processes whose executable name is `name`
    async fn list_by_name(&self, name: &str) -> io::Result<Vec<u32>>;

    /// Forcibly terminate `pid`
    async fn kill(&self, pid: u32) -> io::Result<()>;

    /// Kill every process named `name`, returning how many were killed
    async fn kill_all(&self, name: &str) -> io::Result<usize> {
        let pids = self.list_by_name(name).await?;
        let mut killed = 0;
        for pid in pids {
            match self.kill(pid).await {
                Ok(()) => killed += 1,
                // the process may have exited between listing and killing
                Err(e) => debug!("Could not kill {} ({}): {}", name, pid, e),
            }
        }
        Ok(killed)
    }

    /// Kill every process named `name` without an async runtime
    ///
    /// Used from `Drop`, where awaiting is not possible.
    fn kill_all_blocking(&self, name: &str) -> io::Result<usize>;
}

/// Process control through the platform's process tools
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

#[async_trait]
impl ProcessControl for SystemProcesses {
    async fn list_by_name(&self, name: &str) -> io::Result<Vec<u32>> {
        let output = Command::from(list_command(name))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;

        Ok(parse_pid_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn kill(&self, pid: u32) -> io::Result<()> {
        let status = Command::from(kill_command(pid))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("kill of process {} exited with {}", pid, status),
            ))
        }
    }

    fn kill_all_blocking(&self, name: &str) -> io::Result<usize> {
        let output = list_command(name)
            .stderr(Stdio::null())
            .output()?;

        let mut killed = 0;
        for pid in parse_pid_listing(&String::from_utf8_lossy(&output.stdout)) {
            let status = kill_command(pid)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            if status.success() {
                killed += 1;
            }
        }
        Ok(killed)
    }
}

#[cfg(unix)]
fn list_command(name: &str) -> StdCommand {
    let mut command = StdCommand::new("pgrep");
    command.arg("-x").arg(name);
    command
}

#[cfg(windows)]
fn list_command(name: &str) -> StdCommand {
    let mut command = StdCommand::new("tasklist");
    command
        .arg("/FI")
        .arg(format!("IMAGENAME eq {}.exe", name))
        .arg("/FO")
        .arg("CSV")
        .arg("/NH");
    command
}

#[cfg(unix)]
fn kill_command(pid: u32) -> StdCommand {
    let mut command = StdCommand::new("kill");
    command.arg("-9").arg(pid.to_string());
    command
}

#[cfg(windows)]
fn kill_command(pid: u32) -> StdCommand {
    let mut command = StdCommand::new("taskkill");
    command.arg("/F").arg("/PID").arg(pid.to_string());
    command
}

/// Extract process ids from `pgrep` lines or `tasklist` CSV rows
fn parse_pid_listing(listing: &str) -> Vec<u32> {
    listing
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            if line.starts_with('"') {
                // "chromedriver.exe","1234","Console","1","10,000 K"
                line.split("\",\"")
                    .nth(1)
                    .and_then(|pid| pid.trim_matches('"').parse().ok())
            } else {
                line.parse().ok()
            }
        })
        .collect()
}
