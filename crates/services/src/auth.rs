//! Identity seam. Credential checks and session issuance belong to an
//! external identity provider; this crate only consumes the results.

use std::collections::HashMap;

use async_trait::async_trait;
use practice_core::model::UserId;

use crate::error::AuthError;

/// The signed-in user as seen by the progress subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: Option<String>,
}

impl UserIdentity {
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self { id, email: None }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange credentials for an identity.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the provider does not accept password logins.
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserIdentity, AuthError>;

    /// Resolve the identity bound to a session token, if any.
    fn current_user(&self, token: &str) -> Option<UserIdentity>;
}

/// Fixed token-to-user table, for deployments where tokens are issued
/// elsewhere and handed to the server through configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserIdentity>,
}

impl StaticTokenAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), UserIdentity::new(user));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, UserId)> for StaticTokenAuth {
    fn from_iter<T: IntoIterator<Item = (String, UserId)>>(iter: T) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|(token, user)| (token, UserIdentity::new(user)))
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuth {
    async fn authenticate(&self, _email: &str, _password: &str) -> Result<UserIdentity, AuthError> {
        Err(AuthError::Unsupported)
    }

    fn current_user(&self, token: &str) -> Option<UserIdentity> {
        self.tokens.get(token).cloned()
    }
}
