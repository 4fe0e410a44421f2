use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::engine::EngineError;
use crate::limits::*;
use crate::persist::Persister;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// A registered account. The credential is a salted SHA-256 digest, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub salt: String,
    pub password_hash: String,
    pub role: Role,
}

impl User {
    /// Build a user with a freshly salted credential. No validation.
    pub fn new(username: impl Into<String>, password: &str, role: Role) -> Self {
        let mut rng = rand::rng();
        let salt: Vec<u8> = (0..16).map(|_| rng.random::<u8>()).collect();
        let salt = hex::encode(salt);
        let password_hash = hash_password(&salt, password);
        Self {
            username: username.into(),
            salt,
            password_hash,
            role,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        let computed = hash_password(&self.salt, password);
        constant_time_eq(computed.as_bytes(), self.password_hash.as_bytes())
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            username: self.username.clone(),
            role: self.role,
        }
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// What callers get back: never the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub role: Role,
}

/// All accounts, persisted to the user snapshot after every change.
pub struct UserRegistry {
    users: RwLock<Vec<User>>,
    persister: Persister,
}

impl UserRegistry {
    pub(crate) fn new(users: Vec<User>, persister: Persister) -> Self {
        Self {
            users: RwLock::new(users),
            persister,
        }
    }

    /// True when no Admin account exists; normal operation must wait for one.
    pub async fn needs_bootstrap(&self) -> bool {
        !self.users.read().await.iter().any(|u| u.role.is_admin())
    }

    pub async fn register(&self, username: &str, password: &str, role: Role) -> Result<UserInfo, EngineError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(EngineError::InvalidInput("username must not be empty"));
        }
        if username.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("username too long"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(EngineError::WeakPassword(MIN_PASSWORD_LEN));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(EngineError::LimitExceeded("password too long"));
        }

        let mut users = self.users.write().await;
        if users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if users.iter().any(|u| u.username == username) {
            return Err(EngineError::UserExists(username.to_string()));
        }
        let user = User::new(username, password, role);
        let info = user.info();
        users.push(user);
        self.persist(&users).await;
        info!(username, ?role, "user registered");
        Ok(info)
    }

    /// Create the first Admin. Fails once any Admin exists.
    pub async fn bootstrap_admin(&self, username: &str, password: &str) -> Result<UserInfo, EngineError> {
        if !self.needs_bootstrap().await {
            return Err(EngineError::AdminExists);
        }
        self.register(username, password, Role::Admin).await
    }

    /// Unknown user and wrong password fail identically.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<UserInfo, EngineError> {
        let users = self.users.read().await;
        match users.iter().find(|u| u.username == username.trim()) {
            Some(user) if user.verify(password) => Ok(user.info()),
            _ => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(EngineError::AuthenticationFailed)
            }
        }
    }

    pub async fn get(&self, username: &str) -> Result<UserInfo, EngineError> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.username == username)
            .map(User::info)
            .ok_or_else(|| EngineError::UserNotFound(username.to_string()))
    }

    pub async fn set_role(&self, username: &str, role: Role) -> Result<(), EngineError> {
        let mut users = self.users.write().await;
        let admins = users.iter().filter(|u| u.role.is_admin()).count();
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| EngineError::UserNotFound(username.to_string()))?;
        if user.role.is_admin() && !role.is_admin() && admins == 1 {
            return Err(EngineError::LastAdmin(username.to_string()));
        }
        user.role = role;
        self.persist(&users).await;
        Ok(())
    }

    pub async fn remove(&self, username: &str) -> Result<(), EngineError> {
        let mut users = self.users.write().await;
        let pos = users
            .iter()
            .position(|u| u.username == username)
            .ok_or_else(|| EngineError::UserNotFound(username.to_string()))?;
        let admins = users.iter().filter(|u| u.role.is_admin()).count();
        if users[pos].role.is_admin() && admins == 1 {
            return Err(EngineError::LastAdmin(username.to_string()));
        }
        users.remove(pos);
        self.persist(&users).await;
        info!(username, "user removed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<UserInfo> {
        self.users.read().await.iter().map(User::info).collect()
    }

    async fn persist(&self, users: &[User]) {
        if let Err(e) = self.persister.save_users(users.to_vec()).await {
            warn!("user snapshot not saved, in-memory state stays authoritative: {e}");
        }
    }
}
