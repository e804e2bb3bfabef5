//! Local chat workspace: an in-process backend persisted to the data directory.

use anyhow::{Context, Result};
use rtchat::backend::BackendSnapshot;
use rtchat::storage::FileStore;
use rtchat::{ChatClient, MemoryBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, Config};

const SNAPSHOT_FILE: &str = "backend.json";
const WATERMARK_FILE: &str = "watermarks.json";

/// Backend, local store and client for one CLI invocation.
pub struct Workspace {
    pub client: ChatClient,
    pub backend: Arc<MemoryBackend>,
    pub config: Config,
    snapshot_path: PathBuf,
}

impl Workspace {
    /// Load the persisted backend and sign in the configured user, if any.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let config = config::load_config(data_dir)?;
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);

        let snapshot = match tokio::fs::read_to_string(&snapshot_path).await {
            Ok(content) => serde_json::from_str::<BackendSnapshot>(&content)
                .context("Failed to parse backend snapshot")?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BackendSnapshot::default(),
            Err(e) => return Err(e).context("Failed to read backend snapshot"),
        };
        let backend = Arc::new(MemoryBackend::from_snapshot(snapshot));
        if let Some(user) = &config.user {
            backend.sign_in(user.profile());
        }

        let store = FileStore::open(data_dir.join(WATERMARK_FILE))
            .await
            .context("Failed to open watermark store")?;
        let client = ChatClient::builder()
            .backend(backend.clone())
            .local_store(Arc::new(store))
            .build()
            .context("Failed to build chat client")?;

        tracing::debug!(path = %snapshot_path.display(), "workspace opened");
        Ok(Self {
            client,
            backend,
            config,
            snapshot_path,
        })
    }

    /// Open a workspace that requires a signed-in user.
    pub async fn open_authed(data_dir: &Path) -> Result<Self> {
        let workspace = Self::open(data_dir).await?;
        if workspace.config.user.is_none() {
            anyhow::bail!("Authentication required. Run 'rtchat auth login' first.");
        }
        Ok(workspace)
    }

    /// Write the backend state back to disk.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create data directory")?;
        }
        let content = serde_json::to_string_pretty(&self.backend.snapshot())
            .context("Failed to serialize backend snapshot")?;
        tokio::fs::write(&self.snapshot_path, content)
            .await
            .context("Failed to write backend snapshot")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use rtchat::UserProfile;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            user: Some(UserConfig {
                id: "bob".to_string(),
                name: "Bob".to_string(),
            }),
        };
        config::save_config(dir.path(), &config).unwrap();

        let workspace = Workspace::open(dir.path()).await.unwrap();
        workspace.backend.add_user(UserProfile::new("alice", "Alice"));
        let conversation = workspace
            .client
            .start_conversation(&"alice".into())
            .await
            .unwrap();
        workspace.save().await.unwrap();

        let reopened = Workspace::open_authed(dir.path()).await.unwrap();
        let roster = reopened.client.roster().await.unwrap();
        assert!(roster.contains(&conversation.id));
        assert_eq!(reopened.backend.users().len(), 2);
    }

    #[tokio::test]
    async fn test_open_authed_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Workspace::open_authed(dir.path()).await.is_err());
    }
}
