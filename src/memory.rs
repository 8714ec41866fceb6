//! In-process store with the same contract as the Postgres one: unique
//! identifiers, compare-and-increment versioning, token expiry and cascade
//! delete. Backs `AppState::fake()` and the test suites.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    errors::{Error, Result},
    tokens::{
        model::{hash_plaintext, Scope, Token},
        store::TokenStore,
    },
    users::{
        filters::{Filters, Metadata},
        model::{Role, User},
        store::UserStore,
    },
};

#[derive(Clone)]
struct StoredToken {
    hash: Vec<u8>,
    user_id: i64,
    expiry: OffsetDateTime,
    scope: &'static str,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    tokens: Vec<StoredToken>,
}

impl Tables {
    fn duplicate_of(&self, user: &User) -> Option<&'static str> {
        self.users.values().filter(|u| u.id != user.id).find_map(|u| {
            if u.email == user.email {
                Some("email")
            } else if u.username == user.username {
                Some("username")
            } else {
                None
            }
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored user rows never keep the plaintext password.
    fn stored(user: &User) -> User {
        let mut row = user.clone();
        row.password = crate::auth::password::Password::from_hash(
            user.password.require_hash().to_string(),
        );
        row
    }

    /// Removes `id` and its tokens only while it is still at `version`.
    pub fn delete_if_version(&self, id: i64, version: i32) -> Result<()> {
        let mut tables = self.lock();
        match tables.users.get(&id) {
            Some(current) if current.version == version => {}
            _ => return Err(Error::EditConflict),
        }
        tables.users.remove(&id);
        tables.tokens.retain(|t| t.user_id != id);
        Ok(())
    }

    pub fn token_count(&self) -> usize {
        self.lock().tokens.len()
    }

    /// Moves every token of `user_id` into the past.
    #[cfg(test)]
    pub fn expire_tokens(&self, user_id: i64) {
        let past = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        for token in self.lock().tokens.iter_mut().filter(|t| t.user_id == user_id) {
            token.expiry = past;
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: &mut User) -> Result<()> {
        user.normalize();
        let mut tables = self.lock();
        if let Some(field) = tables.duplicate_of(user) {
            return Err(Error::DuplicateIdentifier(field));
        }
        tables.next_id += 1;
        let now = OffsetDateTime::now_utc();
        user.id = tables.next_id;
        user.created_at = now;
        user.updated_at = now;
        user.version = 1;
        let row = Self::stored(user);
        tables.users.insert(user.id, row);
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<User> {
        self.lock().users.get(&id).cloned().ok_or(Error::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        let email = email.to_lowercase();
        self.lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn update(&self, user: &mut User) -> Result<()> {
        user.normalize();
        let mut tables = self.lock();
        match tables.users.get(&user.id) {
            Some(current) if current.version == user.version => {}
            _ => return Err(Error::EditConflict),
        }
        if let Some(field) = tables.duplicate_of(user) {
            return Err(Error::DuplicateIdentifier(field));
        }
        user.version += 1;
        user.updated_at = OffsetDateTime::now_utc();
        let row = Self::stored(user);
        tables.users.insert(user.id, row);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let version = self.get_by_id(id).await?.version;
        self.delete_if_version(id, version)
    }

    async fn count_by_role(&self, role: Role) -> Result<i64> {
        Ok(self.lock().users.values().filter(|u| u.role == role).count() as i64)
    }

    async fn search(
        &self,
        username: &str,
        email: &str,
        filters: &Filters,
    ) -> Result<(Vec<User>, Metadata)> {
        let username = username.to_lowercase();
        let email = email.to_lowercase();
        let mut matched: Vec<User> = self
            .lock()
            .users
            .values()
            .filter(|u| u.username.contains(&username) && u.email.contains(&email))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            let ord = match filters.sort_column() {
                "username" => a.username.cmp(&b.username),
                "email" => a.email.cmp(&b.email),
                "created_at" => a.created_at.cmp(&b.created_at),
                _ => a.id.cmp(&b.id),
            };
            let ord = if filters.sort_descending() { ord.reverse() } else { ord };
            ord.then(a.id.cmp(&b.id))
        });
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(filters.offset().max(0) as usize)
            .take(filters.limit().max(0) as usize)
            .collect();
        Ok((page, Metadata::calculate(total, filters.page, filters.page_size)))
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User> {
        let hash = hash_plaintext(plaintext);
        let now = OffsetDateTime::now_utc();
        let tables = self.lock();
        tables
            .tokens
            .iter()
            .find(|t| t.hash == hash && Scope::validate(t.scope, scope) && t.expiry > now)
            .and_then(|t| tables.users.get(&t.user_id))
            .cloned()
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&token.user_id) {
            return Err(Error::NotFound);
        }
        tables.tokens.push(StoredToken {
            hash: token.hash.clone(),
            user_id: token.user_id,
            expiry: token.expiry,
            scope: token.scope.as_str(),
        });
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<()> {
        self.lock()
            .tokens
            .retain(|t| !(t.user_id == user_id && Scope::validate(t.scope, scope)));
        Ok(())
    }

    async fn delete_by_plaintext(&self, scope: Scope, plaintext: &str) -> Result<()> {
        let hash = hash_plaintext(plaintext);
        self.lock()
            .tokens
            .retain(|t| !(t.hash == hash && Scope::validate(t.scope, scope)));
        Ok(())
    }
}
