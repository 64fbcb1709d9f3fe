//! User persistence port and its in-memory adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::user::{Role, User};

type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`UserStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store did not answer in time")]
    Timeout,
}

/// Port for user persistence operations.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Insert or replace a user, keyed by its id.
    async fn upsert(&self, user: &User) -> Result<()>;

    /// Find a user by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Find users whose username or one of whose emails matches `value`,
    /// ignoring case.
    async fn find_by_username_or_email(&self, value: &str) -> Result<Vec<User>>;

    /// Find every user holding `role`.
    async fn find_by_role(&self, role: Role) -> Result<Vec<User>>;

    /// Find users by ids. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<User>>;

    /// Permanently remove a user.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Volatile store, backed by a [`HashMap`].
#[derive(Debug)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while `available` is false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    /// Keep results stable across calls.
    fn sorted(mut users: Vec<User>) -> Vec<User> {
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        self.check()?;

        let mut user = user.clone();
        user.roles.sort();
        user.roles.dedup();

        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.check()?;
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_username_or_email(&self, value: &str) -> Result<Vec<User>> {
        self.check()?;
        if value.is_empty() {
            return Ok(Vec::new());
        }

        let users = self
            .users
            .read()
            .await
            .values()
            .filter(|user| {
                (!user.username.is_empty() && user.username.eq_ignore_ascii_case(value))
                    || user.emails.iter().any(|email| email.eq_ignore_ascii_case(value))
            })
            .cloned()
            .collect();
        Ok(Self::sorted(users))
    }

    async fn find_by_role(&self, role: Role) -> Result<Vec<User>> {
        self.check()?;

        let users = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.has_role(role))
            .cloned()
            .collect();
        Ok(Self::sorted(users))
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<User>> {
        self.check()?;

        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.check()?;

        self.users
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str, roles: Vec<Role>) -> User {
        User {
            id: id.into(),
            username: username.into(),
            emails: vec![username.to_lowercase()],
            roles,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = MemoryStore::new();
        store
            .upsert(&user("1", "Alice@Example.com", vec![Role::Patient, Role::Clinic]))
            .await
            .unwrap();

        let found = store.find_by_id("1").await.unwrap().unwrap();
        // roles are sorted on write.
        assert_eq!(found.roles, vec![Role::Clinic, Role::Patient]);
        assert!(store.find_by_id("2").await.unwrap().is_none());

        let mut updated = found.clone();
        updated.username = "bob@example.com".into();
        store.upsert(&updated).await.unwrap();
        assert_eq!(
            store.find_by_id("1").await.unwrap().unwrap().username,
            "bob@example.com"
        );
    }

    #[tokio::test]
    async fn test_find_by_username_or_email() {
        let store = MemoryStore::new();
        store
            .upsert(&user("1", "Alice@Example.com", vec![Role::Patient]))
            .await
            .unwrap();
        store.upsert(&user("2", "", vec![Role::Guest])).await.unwrap();

        let found = store
            .find_by_username_or_email("alice@example.com")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");

        let found = store
            .find_by_username_or_email("ALICE@EXAMPLE.COM")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let mut contact = user("3", "carol@example.com", vec![Role::Patient]);
        contact.emails = vec!["Carol.Work@Example.com".into()];
        store.upsert(&contact).await.unwrap();
        let found = store
            .find_by_username_or_email("carol.work@example.com")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "3");

        assert!(store.find_by_username_or_email("").await.unwrap().is_empty());
        assert!(
            store
                .find_by_username_or_email("nobody@example.com")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_find_by_role_and_ids() {
        let store = MemoryStore::new();
        store.upsert(&user("b", "b@x.com", vec![Role::Clinic])).await.unwrap();
        store.upsert(&user("a", "a@x.com", vec![Role::Clinic])).await.unwrap();
        store.upsert(&user("c", "c@x.com", vec![Role::Patient])).await.unwrap();

        let clinics = store.find_by_role(Role::Clinic).await.unwrap();
        assert_eq!(
            clinics.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let found = store
            .find_by_ids(&["c".into(), "missing".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(
            found.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.upsert(&user("1", "a@x.com", vec![])).await.unwrap();

        store.remove("1").await.unwrap();
        assert_eq!(store.remove("1").await, Err(StoreError::NotFound));
        assert!(store.find_by_id("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        assert!(store.ping().await.is_ok());

        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.find_by_id("1").await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.find_by_id("1").await.unwrap().is_none());
    }
}
