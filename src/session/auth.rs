// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token verification for the `auth` frame (spec.md §4.5 "Authenticating").
//! The gateway only verifies signatures; issuance is an external
//! collaborator per spec.md §1.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::robot::Role;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no auth public key configured")]
    NotConfigured,
    #[error("invalid public key material: {0}")]
    BadKey(String),
    #[error("token rejected: {0}")]
    TokenInvalid(String),
}

/// Verifies session auth tokens against a single configured public key.
/// RS256 is assumed for the PEM material; this matches the signature
/// algorithm most commonly paired with a bare public-key deployment (no
/// shared-secret distribution problem), the same reasoning that leads the
/// teacher to prefer a pre-shared bearer token only for its own
/// low-assurance local-dev auth path.
pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        let decoding_key =
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::BadKey(e.to_string()))?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        Ok(Self { decoding_key, validation })
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))?;
        Ok(AuthenticatedUser { user_id: data.claims.sub, role: Role::from_str_lenient(&data.claims.role) })
    }
}
