//! User identity and profile lookup.

use async_trait::async_trait;
use confab_protocol::UserId;
use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;

/// Narrow view over the external identity system.
///
/// Profile creation is an explicit call from the account-creation
/// workflow, not a persistence side effect.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Whether a user id resolves to a known account.
    async fn exists(&self, user: &str) -> Result<bool, StoreError>;

    /// Display name for a known user.
    async fn display_name(&self, user: &str) -> Result<String, StoreError>;

    /// Avatar URL, if the user has one.
    async fn avatar_url(&self, user: &str) -> Result<Option<String>, StoreError>;

    /// Create a profile for a new account.
    async fn create_profile(&self, user: &str, display_name: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Profile {
    display_name: String,
    avatar_url: Option<String>,
}

/// In-memory directory for the single-process server and tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    profiles: DashMap<UserId, Profile>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile with an avatar (tests and local bootstrap).
    pub fn insert(
        &self,
        user: impl Into<UserId>,
        display_name: impl Into<String>,
        avatar_url: Option<String>,
    ) {
        self.profiles.insert(
            user.into(),
            Profile {
                display_name: display_name.into(),
                avatar_url,
            },
        );
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn exists(&self, user: &str) -> Result<bool, StoreError> {
        Ok(self.profiles.contains_key(user))
    }

    async fn display_name(&self, user: &str) -> Result<String, StoreError> {
        self.profiles
            .get(user)
            .map(|p| p.display_name.clone())
            .ok_or_else(|| StoreError::UnknownUser(user.to_string()))
    }

    async fn avatar_url(&self, user: &str) -> Result<Option<String>, StoreError> {
        self.profiles
            .get(user)
            .map(|p| p.avatar_url.clone())
            .ok_or_else(|| StoreError::UnknownUser(user.to_string()))
    }

    async fn create_profile(&self, user: &str, display_name: &str) -> Result<(), StoreError> {
        self.profiles.insert(
            user.to_string(),
            Profile {
                display_name: display_name.to_string(),
                avatar_url: None,
            },
        );
        debug!(user = %user, "Profile created");
        Ok(())
    }
}
