//! Access token verification
//!
//! Tokens are issued by the identity provider and signed with its shared
//! HS256 secret. We only verify them; issuing is not our job.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience the identity provider stamps on signed-in user tokens
pub const AUTHENTICATED_AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub email: Option<String>,
    pub aud: String,
    pub exp: i64,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUTHENTICATED_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_valid_token() {
        let user_id = Uuid::new_v4();
        let verifier = JwtVerifier::new(TEST_SECRET);

        let claims = verifier.verify(&token_for(user_id, "a@example.com")).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new("another-secret");
        let result = verifier.verify(&token_for(Uuid::new_v4(), "a@example.com"));
        assert!(matches!(result, Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_expired_rejected() {
        let mut claims = claims_for(Uuid::new_v4(), Some("a@example.com"));
        claims.exp = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let verifier = JwtVerifier::new(TEST_SECRET);

        let result = verifier.verify(&sign(&claims, TEST_SECRET));

        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let mut claims = claims_for(Uuid::new_v4(), Some("a@example.com"));
        claims.aud = "anon".to_string();
        let verifier = JwtVerifier::new(TEST_SECRET);

        assert!(verifier.verify(&sign(&claims, TEST_SECRET)).is_err());
    }
}
