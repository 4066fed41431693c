//! Identity provider seam.
//!
//! The engine only needs "current user id or none" and a sign-out hook.
//! [`sign_out`] guarantees the repository's session is torn down before the
//! provider completes its own sign-out, so no remote write can race a
//! session that is no longer valid.

use std::future::Future;

use parking_lot::Mutex;

use crate::notify::NotificationScheduler;
use crate::remote::RemoteStore;
use crate::repository::TaskRepository;
use crate::store::KeyValueBackend;

/// Errors reported by an identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No user is signed in.
    #[error("not signed in")]
    NotSignedIn,

    /// The provider failed to sign out.
    #[error("sign-out failed: {0}")]
    SignOut(String),
}

/// Supplies the signed-in user.
pub trait IdentityProvider: Send + Sync {
    /// The stable id of the signed-in user, if any.
    fn current_user_id(&self) -> Option<String>;

    /// Ends the provider's session.
    fn sign_out(&self) -> impl Future<Output = Result<(), IdentityError>> + Send;
}

/// Identity with a fixed, locally configured user id.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user_id: Mutex<Option<String>>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Mutex::new(Some(user_id.into())),
        }
    }

    /// An identity with nobody signed in.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.lock().clone()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.user_id
            .lock()
            .take()
            .map(|_| ())
            .ok_or(IdentityError::NotSignedIn)
    }
}

/// Tears down the repository session, then signs out of the provider.
///
/// # Errors
///
/// Returns the provider's error. The repository session is torn down
/// regardless.
pub async fn sign_out<R, N, B, I>(
    repository: &mut TaskRepository<R, N, B>,
    identity: &I,
) -> Result<(), IdentityError>
where
    R: RemoteStore,
    N: NotificationScheduler,
    B: KeyValueBackend,
    I: IdentityProvider,
{
    repository.teardown_session();
    identity.sign_out().await?;
    tracing::info!("signed out");
    Ok(())
}
