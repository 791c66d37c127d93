//! Thin wrapper over the `git` executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::error::{MirrorError, Result};

/// Runs git commands in one working tree.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn git_dir(&self) -> PathBuf {
        self.dir.join(".git")
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        debug!(dir = %self.dir.display(), ?args, "git");
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .map_err(|e| MirrorError::Git {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: format!("failed to run git: {e}"),
            })
    }

    /// Runs a command that must succeed and returns its trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(MirrorError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs a command whose exit status is the answer (`diff --quiet`).
    fn check(&self, args: &[&str]) -> Result<bool> {
        let output = self.output(args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(MirrorError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// True once `init` has run. A `.git` directory holding only the
    /// mirror lock does not count.
    pub fn is_repo(&self) -> bool {
        self.git_dir().join("HEAD").is_file()
    }

    /// Initialises a repository with `branch` as its unborn HEAD.
    pub fn init(&self, branch: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        self.run(&["init", "-q"])?;
        self.run(&["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")])?;
        Ok(())
    }

    /// HEAD commit, or `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<String>> {
        let output = self.output(&["rev-parse", "--verify", "-q", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    /// Porcelain status lines for uncommitted changes, untracked included.
    pub fn status(&self) -> Result<Vec<String>> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub fn remote_url(&self, name: &str) -> Result<Option<String>> {
        let output = self.output(&["remote", "get-url", name])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Points `name` at `url`, adding the remote if needed.
    pub fn set_remote(&self, name: &str, url: &str) -> Result<()> {
        match self.remote_url(name)? {
            Some(current) if current == url => Ok(()),
            Some(_) => self.run(&["remote", "set-url", name, url]).map(drop),
            None => self.run(&["remote", "add", name, url]).map(drop),
        }
    }

    pub fn add_all(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend_from_slice(paths);
        self.run(&args).map(drop)
    }

    /// Returns true if the index matches HEAD (or is empty on an unborn
    /// branch).
    pub fn index_is_clean(&self) -> Result<bool> {
        if self.head()?.is_some() {
            self.check(&["diff", "--cached", "--quiet"])
        } else {
            Ok(self.run(&["ls-files", "--cached"])?.is_empty())
        }
    }

    /// Commits the index and returns the new HEAD.
    pub fn commit(&self, author: &Author, message: &str) -> Result<String> {
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.run(&["-c", &name, "-c", &email, "commit", "-q", "-m", message])?;
        self.run(&["rev-parse", "HEAD"])
    }

    /// Creates a parentless commit of HEAD's tree and returns it.
    pub fn commit_tree_of_head(&self, author: &Author, message: &str) -> Result<String> {
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.run(&[
            "-c", &name, "-c", &email, "commit-tree", "HEAD^{tree}", "-m", message,
        ])
    }

    pub fn push(&self, remote: &str, branch: &str, force: bool) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let mut args = vec!["push", "-q"];
        if force {
            args.push("--force");
        }
        args.extend_from_slice(&[remote, refspec.as_str()]);
        self.run(&args).map(drop)
    }
}

/// Committer identity used for mirror commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "depotsync".into(),
            email: "depotsync@localhost".into(),
        }
    }
}
