//! Git operations: bring the working copy onto a PR's branch before the
//! assistant runs.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::cmd::{output_text, CommandErrorContext};

/// The checked-out source tree the assistant works in.
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// Fetch, check out and fast-forward `branch`.
    async fn checkout(&self, branch: &str) -> anyhow::Result<()>;
}

/// A local git clone with an `origin` remote.
pub struct GitWorkingCopy {
    dir: PathBuf,
}

impl GitWorkingCopy {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output_with_context()
            .await?;
        let (stdout, stderr) = output_text(&output);
        if !output.status.success() {
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr);
        }
        Ok(stdout)
    }
}

#[async_trait]
impl WorkingCopy for GitWorkingCopy {
    async fn checkout(&self, branch: &str) -> anyhow::Result<()> {
        self.git(&["fetch", "origin", branch]).await?;
        self.git(&["checkout", branch]).await?;
        self.git(&["pull", "--ff-only", "origin", branch]).await?;
        tracing::info!(branch, dir = %self.dir.display(), "checked out branch");
        Ok(())
    }
}
