//! Authentication result types

use crate::types::User;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;

/// Outcome class of a realm's authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationStatus {
    /// The realm authenticated the user
    Success,
    /// The realm could not authenticate the user; the next realm may try
    Continue,
    /// The realm chain must stop
    Terminate,
}

/// Error attached to an unsuccessful result. Shared because a single result
/// may be delivered to several waiting callers.
pub type AuthenticationCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Result handed back to the realm chain. Never carries a secret.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    status: AuthenticationStatus,
    user: Option<User>,
    message: Option<String>,
    exception: Option<AuthenticationCause>,
}

impl AuthenticationResult {
    pub fn success(user: User) -> Self {
        Self {
            status: AuthenticationStatus::Success,
            user: Some(user),
            message: None,
            exception: None,
        }
    }

    pub fn unsuccessful<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            status: AuthenticationStatus::Continue,
            user: None,
            message: Some(message.into()),
            exception: Some(Arc::new(cause)),
        }
    }

    pub fn status(&self) -> AuthenticationStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == AuthenticationStatus::Success
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn exception(&self) -> Option<&AuthenticationCause> {
        self.exception.as_ref()
    }
}
