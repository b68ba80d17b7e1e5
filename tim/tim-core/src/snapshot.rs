use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{build::CheckoutBuilder, IndexAddOption, Oid, Repository, Signature};
use serde::Serialize;

use crate::db::TimDb;

/// A commit of the data directory.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SnapshotInfo {
    pub id: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Versions the data directory in a git repository rooted at the same
/// directory.
pub struct SnapshotManager {
    repo: Repository,
}

impl SnapshotManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let repo = if dir.join(".git").exists() {
            Repository::open(dir)?
        } else {
            std::fs::create_dir_all(dir)?;
            Repository::init(dir)?
        };
        Ok(Self { repo })
    }

    /// Commit the persisted state of `db`.
    pub fn snapshot(&self, db: &TimDb) -> Result<Oid> {
        let workdir = self
            .repo
            .workdir()
            .ok_or_else(|| anyhow!("snapshot repository has no working directory"))?;
        if workdir.canonicalize()? != db.data_dir().canonicalize()? {
            return Err(anyhow!("snapshot repository is not rooted at the data directory"));
        }

        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // deleted documents and paragraphs
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let sig = Signature::now("tim", "tim@localhost")?;
        let msg = format!("Snapshot {}", Utc::now().to_rfc3339());
        let commit_id = match self.repo.head() {
            Ok(head) => {
                let parent = head.peel_to_commit()?;
                if parent.tree_id() == tree_id {
                    return Ok(parent.id());
                }
                self.repo
                    .commit(Some("HEAD"), &sig, &sig, &msg, &tree, &[&parent])?
            }
            Err(_) => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, &msg, &tree, &[])?,
        };
        tracing::info!(commit = %commit_id, "snapshot written");
        Ok(commit_id)
    }

    /// Snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        if self.repo.head().is_err() {
            return Ok(Vec::new());
        }
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        let mut out = Vec::new();
        for id in walk {
            let commit = self.repo.find_commit(id?)?;
            let time = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .ok_or_else(|| anyhow!("invalid commit time"))?;
            out.push(SnapshotInfo {
                id: commit.id().to_string(),
                time,
                message: commit.message().unwrap_or_default().to_string(),
            });
        }
        Ok(out)
    }

    /// Check out `rev` into the data directory and reload `db` from it.
    pub fn restore(&self, db: &mut TimDb, rev: &str) -> Result<()> {
        let commit = self.repo.revparse_single(rev)?.peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        self.repo.set_head_detached(commit.id())?;
        db.reload()?;
        db.clear_dirty();
        Ok(())
    }
}

/// Periodically snapshot the database when it has changed.
pub async fn snapshot_task(db: Arc<RwLock<TimDb>>, manager: SnapshotManager, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let mut db = db.write().await;
        if db.is_dirty() {
            match manager.snapshot(&db) {
                Ok(_) => db.clear_dirty(),
                Err(e) => tracing::warn!(error = %e, "snapshot failed"),
            }
        }
    }
}
