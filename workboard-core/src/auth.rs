//! Identity provider seam.
//!
//! The board only needs four things from whatever identity service fronts
//! it: sign-up, sign-in, sign-out, and a stream of auth-state changes
//! delivering the current identity or nothing. `LocalAuth` satisfies the
//! contract in-process for the bundled server and the tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered: {0}")]
    EmailTaken(String),
    #[error("not signed in")]
    NotSignedIn,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Auth-state stream; yields the authenticated identity or None.
    fn auth_state(&self) -> watch::Receiver<Option<Identity>>;
}

struct Account {
    user_id: String,
    password: String,
}

/// In-process provider: an email/password map plus the auth-state channel.
pub struct LocalAuth {
    accounts: Mutex<HashMap<String, Account>>,
    state: watch::Sender<Option<Identity>>,
}

impl LocalAuth {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            state: watch::channel(None).0,
        }
    }

    /// Demo-login convenience: sign in, falling back to account creation
    /// when the email has never been registered.
    pub async fn sign_in_or_create(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        match self.sign_in(email, password).await {
            Ok(identity) => Ok(identity),
            Err(AuthError::InvalidCredentials) => match self.sign_up(email, password).await {
                Ok(identity) => Ok(identity),
                // Registered with a different password; surface the
                // credential failure, not the duplicate email.
                Err(AuthError::EmailTaken(_)) => Err(AuthError::InvalidCredentials),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let mut accounts = self
                .accounts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if accounts.contains_key(email) {
                return Err(AuthError::EmailTaken(email.to_string()));
            }
            let user_id = Uuid::new_v4().to_string();
            accounts.insert(
                email.to_string(),
                Account {
                    user_id: user_id.clone(),
                    password: password.to_string(),
                },
            );
            Identity {
                user_id,
                email: email.to_string(),
            }
        };
        let _ = self.state.send(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let accounts = self
                .accounts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let account = accounts.get(email).ok_or(AuthError::InvalidCredentials)?;
            if account.password != password {
                return Err(AuthError::InvalidCredentials);
            }
            Identity {
                user_id: account.user_id.clone(),
                email: email.to_string(),
            }
        };
        let _ = self.state.send(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.state.borrow().is_none() {
            return Err(AuthError::NotSignedIn);
        }
        let _ = self.state.send(None);
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}
