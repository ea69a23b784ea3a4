//! Collaboration service token issuance.
//!
//! The browser-side editor authenticates against the external real-time
//! collaboration service with a JWT signed by us. Claims:
//!
//! - `aud`: collaboration environment ID
//! - `iat`: issue time (Unix timestamp)
//! - `sub`: user identifier
//! - `auth.collaboration.*.role`: role on every channel
//! - `user`: profile shown to other collaborators
//!
//! Tokens are signed with the environment access key using HMAC-SHA-512.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Channel key granting a role on every document.
pub const ALL_CHANNELS: &str = "*";

/// Errors raised while issuing or verifying collaboration tokens.
#[derive(Debug, Error)]
pub enum CollaborationTokenError {
    #[error("collaboration environment ID is not configured")]
    MissingEnvironmentId,

    #[error("collaboration access key is not configured")]
    MissingAccessKey,

    #[error("user identifier must not be empty")]
    MissingUser,

    #[error("unknown collaboration role: {0}")]
    UnknownRole(String),

    #[error("failed to sign collaboration token")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("invalid collaboration token")]
    Decode(#[source] jsonwebtoken::errors::Error),
}

/// Role of a user on a collaboration channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationRole {
    /// Read-only access.
    Reader,
    /// May add comments but not edit.
    Commentator,
    /// Full editing rights.
    Writer,
}

impl CollaborationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Commentator => "commentator",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for CollaborationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollaborationRole {
    type Err = CollaborationTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reader" => Ok(Self::Reader),
            "commentator" => Ok(Self::Commentator),
            "writer" => Ok(Self::Writer),
            other => Err(CollaborationTokenError::UnknownRole(other.to_string())),
        }
    }
}

/// Profile data of the user a token is issued for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl CollaborationUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Role grant for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPermission {
    pub role: CollaborationRole,
}

/// The `auth` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaim {
    pub collaboration: BTreeMap<String, ChannelPermission>,
}

/// JWT claims understood by the collaboration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationClaims {
    /// Audience (environment ID).
    pub aud: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Subject (user ID).
    pub sub: String,
    pub auth: AuthClaim,
    pub user: CollaborationUser,
}

impl CollaborationClaims {
    /// Role granted on all channels, if any.
    pub fn role(&self) -> Option<CollaborationRole> {
        self.auth.collaboration.get(ALL_CHANNELS).map(|p| p.role)
    }
}

/// Issues and verifies collaboration tokens for one environment.
#[derive(Clone)]
pub struct CollaborationTokenService {
    environment_id: String,
    default_role: CollaborationRole,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl CollaborationTokenService {
    /// Create a token service for an environment and its access key.
    pub fn new(
        environment_id: &str,
        access_key: &str,
        default_role: CollaborationRole,
    ) -> Result<Self, CollaborationTokenError> {
        if environment_id.trim().is_empty() {
            return Err(CollaborationTokenError::MissingEnvironmentId);
        }
        if access_key.is_empty() {
            return Err(CollaborationTokenError::MissingAccessKey);
        }
        Ok(Self {
            environment_id: environment_id.trim().to_string(),
            default_role,
            encoding_key: EncodingKey::from_secret(access_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(access_key.as_bytes()),
        })
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    pub fn default_role(&self) -> CollaborationRole {
        self.default_role
    }

    /// Build the claims for a user at a given issue time.
    pub fn claims_for(
        &self,
        user: &CollaborationUser,
        role: Option<CollaborationRole>,
        issued_at: i64,
    ) -> CollaborationClaims {
        let mut collaboration = BTreeMap::new();
        collaboration.insert(
            ALL_CHANNELS.to_string(),
            ChannelPermission {
                role: role.unwrap_or(self.default_role),
            },
        );
        CollaborationClaims {
            aud: self.environment_id.clone(),
            iat: issued_at,
            sub: user.id.clone(),
            auth: AuthClaim { collaboration },
            user: user.clone(),
        }
    }

    /// Issue a token for `user`, falling back to the default role.
    pub fn issue(
        &self,
        user: &CollaborationUser,
        role: Option<CollaborationRole>,
    ) -> Result<String, CollaborationTokenError> {
        self.issue_at(user, role, chrono::Utc::now().timestamp())
    }

    /// Issue a token with an explicit issue time.
    pub fn issue_at(
        &self,
        user: &CollaborationUser,
        role: Option<CollaborationRole>,
        issued_at: i64,
    ) -> Result<String, CollaborationTokenError> {
        if user.id.trim().is_empty() {
            return Err(CollaborationTokenError::MissingUser);
        }
        let claims = self.claims_for(user, role, issued_at);
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &self.encoding_key,
        )
        .map_err(CollaborationTokenError::Encode)?;

        debug!(user = %claims.sub, role = ?claims.role(), "issued collaboration token");
        Ok(token)
    }

    /// Verify a token signed with this environment's key.
    ///
    /// Tokens carry no expiry claim; only signature, algorithm and
    /// audience are checked.
    pub fn verify(&self, token: &str) -> Result<CollaborationClaims, CollaborationTokenError> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.set_audience(&[&self.environment_id]);

        jsonwebtoken::decode::<CollaborationClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(CollaborationTokenError::Decode)
    }
}

impl fmt::Debug for CollaborationTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaborationTokenService")
            .field("environment_id", &self.environment_id)
            .field("default_role", &self.default_role)
            .finish_non_exhaustive()
    }
}
