use std::collections::HashSet;

use jsonwebtoken::{
    decode, encode, errors::Error, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;

use crate::config::AuthSettings;
use crate::routes::auth::claims::Claims;

pub const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIN_UNIQUE_JWT_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum JwtSecretError {
    #[error("JWT_SECRET is {actual} bytes; at least {required} are needed")]
    TooShort { actual: usize, required: usize },
    #[error("JWT_SECRET has only {actual} distinct bytes; at least {required} are needed")]
    LowEntropy { actual: usize, required: usize },
}

/// HS256 keys for tokens shared with the identity service, bound to one issuer and audience.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(
        secret: impl AsRef<[u8]>,
        issuer: &str,
        audience: &str,
    ) -> Result<Self, JwtSecretError> {
        let secret = secret.as_ref();
        if secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(JwtSecretError::TooShort {
                actual: secret.len(),
                required: MIN_JWT_SECRET_LENGTH,
            });
        }
        let distinct = secret.iter().collect::<HashSet<_>>().len();
        if distinct < MIN_UNIQUE_JWT_BYTES {
            return Err(JwtSecretError::LowEntropy {
                actual: distinct,
                required: MIN_UNIQUE_JWT_BYTES,
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
            validation,
        })
    }

    pub fn from_settings(auth: &AuthSettings) -> Result<Self, JwtSecretError> {
        Self::new(&auth.jwt_secret, &auth.issuer, &auth.audience)
    }

    /// Signs `claims` with this key's issuer and audience filled in.
    pub fn issue(&self, mut claims: Claims) -> Result<String, Error> {
        claims.iss = self.issuer.clone();
        claims.aud = self.audience.clone();
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Checks signature, expiry, issuer and audience.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

pub trait JwtKeyProvider {
    fn jwt_keys(&self) -> &JwtKeys;
}
