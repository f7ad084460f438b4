//! Follower relations
//!
//! Maps a local actor id to the set of remote actor URLs following it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::document;
use crate::error::AppError;
use crate::metrics::FOLLOWERS_TOTAL;

type Relations = BTreeMap<String, BTreeSet<String>>;

/// Persistent follower store
///
/// The mutex is held across the snapshot write, so concurrent mutations
/// are applied and persisted one at a time.
pub struct FollowerStore {
    path: PathBuf,
    relations: Mutex<Relations>,
}

impl FollowerStore {
    /// Load the followers document at `path` (missing file = no followers).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let relations: Relations = document::load(&path).await?;

        let total = total_followers(&relations);
        FOLLOWERS_TOTAL.set(total as i64);
        tracing::info!(path = %path.display(), followers = total, "Follower store loaded");

        Ok(Self {
            path,
            relations: Mutex::new(relations),
        })
    }

    /// Add `follower` to the followers of `local_actor`.
    ///
    /// Returns `false` when the relation already existed; nothing is
    /// written in that case.
    pub async fn add(&self, local_actor: &str, follower: &str) -> Result<bool, AppError> {
        let mut relations = self.relations.lock().await;

        let inserted = relations
            .entry(local_actor.to_string())
            .or_default()
            .insert(follower.to_string());
        if !inserted {
            return Ok(false);
        }

        if let Err(error) = document::persist(&self.path, &*relations).await {
            remove_relation(&mut relations, local_actor, follower);
            return Err(error);
        }

        FOLLOWERS_TOTAL.set(total_followers(&relations) as i64);
        tracing::debug!(actor = %local_actor, follower = %follower, "Follower added");
        Ok(true)
    }

    /// Remove `follower` from the followers of `local_actor`.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn remove(&self, local_actor: &str, follower: &str) -> Result<bool, AppError> {
        let mut relations = self.relations.lock().await;

        if !remove_relation(&mut relations, local_actor, follower) {
            return Ok(false);
        }

        if let Err(error) = document::persist(&self.path, &*relations).await {
            relations
                .entry(local_actor.to_string())
                .or_default()
                .insert(follower.to_string());
            return Err(error);
        }

        FOLLOWERS_TOTAL.set(total_followers(&relations) as i64);
        tracing::debug!(actor = %local_actor, follower = %follower, "Follower removed");
        Ok(true)
    }

    /// Snapshot of the followers of `local_actor`
    pub async fn followers(&self, local_actor: &str) -> Vec<String> {
        self.relations
            .lock()
            .await
            .get(local_actor)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, local_actor: &str, follower: &str) -> bool {
        self.relations
            .lock()
            .await
            .get(local_actor)
            .is_some_and(|set| set.contains(follower))
    }

    pub async fn count(&self, local_actor: &str) -> usize {
        self.relations
            .lock()
            .await
            .get(local_actor)
            .map_or(0, BTreeSet::len)
    }
}

fn remove_relation(relations: &mut Relations, local_actor: &str, follower: &str) -> bool {
    let Some(set) = relations.get_mut(local_actor) else {
        return false;
    };
    let removed = set.remove(follower);
    if set.is_empty() {
        relations.remove(local_actor);
    }
    removed
}

fn total_followers(relations: &Relations) -> usize {
    relations.values().map(BTreeSet::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ALICE: &str = "https://inbox.example/u/alice";
    const BOB: &str = "https://remote.example/users/bob";
    const CAROL: &str = "https://remote.example/users/carol";

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FollowerStore::open(dir.path().join("followers.json"))
            .await
            .unwrap();

        assert!(store.add(ALICE, BOB).await.unwrap());
        assert!(!store.add(ALICE, BOB).await.unwrap());
        assert_eq!(store.followers(ALICE).await, vec![BOB.to_string()]);
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("followers.json");

        {
            let store = FollowerStore::open(&path).await.unwrap();
            store.add(ALICE, BOB).await.unwrap();
            store.add(ALICE, CAROL).await.unwrap();
            store.remove(ALICE, BOB).await.unwrap();
        }

        let reopened = FollowerStore::open(&path).await.unwrap();
        assert_eq!(reopened.followers(ALICE).await, vec![CAROL.to_string()]);
        assert!(!reopened.contains(ALICE, BOB).await);
    }

    #[tokio::test]
    async fn remove_unknown_follower_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = FollowerStore::open(dir.path().join("followers.json"))
            .await
            .unwrap();

        assert!(!store.remove(ALICE, BOB).await.unwrap());
        assert_eq!(store.count(ALICE).await, 0);
    }

    #[tokio::test]
    async fn concurrent_adds_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("followers.json");
        let store = Arc::new(FollowerStore::open(&path).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .add(ALICE, &format!("https://remote.example/users/{i}"))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reopened = FollowerStore::open(&path).await.unwrap();
        assert_eq!(reopened.count(ALICE).await, 16);
    }
}
