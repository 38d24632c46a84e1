//! Destination repositories driven through the `git` command line
//!
//! Only the handful of porcelain commands the converter needs are wrapped.
//! Every invocation pins identity, signing and line-ending settings so the
//! resulting history depends on nothing but the container.

use crate::error::{Result, SrcsError};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::trace;

const AUTHOR_NAME: &str = "srcs";
const AUTHOR_EMAIL: &str = "srcs@localhost";

/// Whether a usable `git` binary is on the PATH
pub fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A working tree with its `.git` directory
#[derive(Debug, Clone)]
pub struct GitRepository {
    work_tree: PathBuf,
}

impl GitRepository {
    /// Create a new repository in `work_tree`
    pub fn init(work_tree: &Path) -> Result<Self> {
        let repo = Self {
            work_tree: work_tree.to_path_buf(),
        };
        repo.run(&["-c", "init.defaultBranch=master", "init", "-q"])?;
        Ok(repo)
    }

    /// Use an existing repository
    pub fn open(work_tree: &Path) -> Self {
        Self {
            work_tree: work_tree.to_path_buf(),
        }
    }

    /// Working tree root
    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    /// Stage everything, deletions included, and commit it at `epoch_secs`
    ///
    /// Returns the new commit id. An unchanged tree still produces a commit.
    pub fn commit_all(&self, message: &str, epoch_secs: u64) -> Result<String> {
        self.run(&["add", "--all", "--force", "."])?;

        let date = format!("{} +0000", epoch_secs);
        let user_name = format!("user.name={}", AUTHOR_NAME);
        let user_email = format!("user.email={}", AUTHOR_EMAIL);
        let mut command = self.command();
        command
            .args([
                "-c",
                user_name.as_str(),
                "-c",
                user_email.as_str(),
                "commit",
                "-q",
                "--allow-empty",
                "--no-verify",
                "-m",
                message,
            ])
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date);
        self.execute("commit", command)?;
        self.head()
    }

    /// Id of the current HEAD commit
    pub fn head(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "HEAD"])?;
        Ok(stdout_text(&out))
    }

    /// Create a lightweight tag
    pub fn tag(&self, name: &str, commit: &str) -> Result<()> {
        self.run(&["tag", name, commit])?;
        Ok(())
    }

    /// All tag names
    pub fn tags(&self) -> Result<Vec<String>> {
        let out = self.run(&["tag", "--list"])?;
        Ok(lines(&out))
    }

    /// Commit a tag points at
    pub fn resolve(&self, rev: &str) -> Result<String> {
        let out = self.run(&["rev-parse", &format!("{}^{{commit}}", rev)])?;
        Ok(stdout_text(&out))
    }

    /// Every commit on HEAD, oldest first
    pub fn commits_oldest_first(&self) -> Result<Vec<String>> {
        let out = self.run(&["rev-list", "--reverse", "HEAD"])?;
        Ok(lines(&out))
    }

    /// Author date of a commit in epoch seconds
    pub fn commit_time(&self, commit: &str) -> Result<u64> {
        let out = self.run(&["log", "-1", "--format=%at", commit])?;
        let text = stdout_text(&out);
        text.parse().map_err(|_| SrcsError::Git {
            command: "log".to_string(),
            message: format!("unexpected date output '{}'", text),
        })
    }

    /// Force the working tree to `commit`
    pub fn checkout(&self, commit: &str) -> Result<()> {
        self.run(&["checkout", "-q", "--force", commit])?;
        self.run(&["clean", "-q", "-f", "-d"])?;
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        command
            .current_dir(&self.work_tree)
            .args([
                "-c",
                "commit.gpgsign=false",
                "-c",
                "tag.gpgsign=false",
                "-c",
                "core.autocrlf=false",
            ])
            .env("GIT_TERMINAL_PROMPT", "0");
        command
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let name = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .copied()
            .unwrap_or("git");
        let mut command = self.command();
        command.args(args);
        self.execute(name, command)
    }

    fn execute(&self, name: &str, mut command: Command) -> Result<Output> {
        trace!("git {} in {:?}", name, self.work_tree);
        let output = command.output().map_err(|e| SrcsError::Git {
            command: name.to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(SrcsError::Git {
                command: name.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
