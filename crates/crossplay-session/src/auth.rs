//! Player identity: what the client claims and what the backend accepts.
//!
//! Crossplay does not verify identities itself. The [`IdentityService`]
//! trait is the seam where an external identity provider plugs in; the
//! gateway calls it when the backend challenges a login. For backends
//! running without authentication, [`OfflineIdentity`] accepts everyone.

use std::future::Future;

use uuid::Uuid;

use crate::SessionError;

/// Longest username either edition accepts.
pub const MAX_USERNAME_LEN: usize = 16;

/// Authentication data supplied by the client's login packet.
///
/// Set once per session and never changed after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub username: String,
    pub uuid: Uuid,
    pub xuid: String,
    /// Opaque session token handed to the identity service.
    pub token: String,
}

impl AuthData {
    /// Checks the username is usable on the backend.
    pub fn validate(&self) -> Result<(), SessionError> {
        let name = &self.username;
        if name.is_empty() {
            return Err(SessionError::AuthFailed("empty username".into()));
        }
        if name.chars().count() > MAX_USERNAME_LEN {
            return Err(SessionError::AuthFailed(format!(
                "username longer than {MAX_USERNAME_LEN} characters"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(SessionError::AuthFailed(
                "username contains control characters".into(),
            ));
        }
        Ok(())
    }
}

/// A verified identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub uuid: Uuid,
}

/// Verifies a username and session token with an identity provider.
///
/// # Example
///
/// ```rust
/// use crossplay_session::{IdentityService, Profile, SessionError};
///
/// struct DenyList(Vec<String>);
///
/// impl IdentityService for DenyList {
///     async fn verify(&self, username: &str, _token: &str) -> Result<Profile, SessionError> {
///         if self.0.iter().any(|n| n == username) {
///             return Err(SessionError::AuthFailed("banned".into()));
///         }
///         Ok(Profile {
///             name: username.to_string(),
///             uuid: crossplay_session::offline_uuid(username),
///         })
///     }
/// }
/// ```
pub trait IdentityService: Send + Sync + 'static {
    /// Returns the verified profile, or [`SessionError::AuthFailed`].
    fn verify(
        &self,
        username: &str,
        token: &str,
    ) -> impl Future<Output = Result<Profile, SessionError>> + Send;
}

/// The stable id an offline-mode backend assigns to `username`.
pub fn offline_uuid(username: &str) -> Uuid {
    let name = format!("OfflinePlayer:{username}");
    Uuid::new_v3(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Accepts every player with a name-derived id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineIdentity;

impl IdentityService for OfflineIdentity {
    async fn verify(&self, username: &str, _token: &str) -> Result<Profile, SessionError> {
        Ok(Profile {
            name: username.to_string(),
            uuid: offline_uuid(username),
        })
    }
}
