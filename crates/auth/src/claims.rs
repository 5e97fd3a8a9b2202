use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_core::{OrganizationId, UserId};

/// JWT claims model.
///
/// Tokens identify a user and, usually, the organization they act in. Roles are
/// deliberately absent: permissions are always resolved from the role store at
/// request time, so a revoked role stops working before the token expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Home organization. Absent for identities that have not picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,

    /// Explicit organization override for cross-organization administration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act_as_organization_id: Option<OrganizationId>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed or badly signed token: {0}")]
    Malformed(String),
}

/// Deterministically validate the claim time window.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// The identity the gate evaluates: who is calling and which organization the
/// session claims. Nothing here has been checked against stores yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub override_organization_id: Option<OrganizationId>,
}

impl SessionIdentity {
    pub fn new(user_id: UserId, organization_id: Option<OrganizationId>) -> Self {
        Self {
            user_id,
            organization_id,
            override_organization_id: None,
        }
    }

    pub fn with_override(mut self, organization_id: OrganizationId) -> Self {
        self.override_organization_id = Some(organization_id);
        self
    }
}

impl From<&JwtClaims> for SessionIdentity {
    fn from(claims: &JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            organization_id: claims.organization_id,
            override_organization_id: claims.act_as_organization_id,
        }
    }
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 validator.
///
/// Signature checking is left to `jsonwebtoken`; the time window is checked by
/// [`validate_claims`] against the caller-supplied clock so tests stay
/// deterministic.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry lives in `expires_at`, not the registered `exp` claim.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
