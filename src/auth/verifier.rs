//! Bearer token verification, in priority order: federated identity →
//! locally-signed JWT → development token.
//!
//! The verifier is pure: it never touches session state, only the config
//! it is handed and (optionally) a federated backend.

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{HubError, HubResult};
use crate::model::{Principal, PrincipalOrigin, Role};

/// A pluggable federated-identity backend (e.g. Firebase Admin). Supplying
/// `None` at the call site disables the federated path entirely, matching
/// the spec's "absence disables the federated path" rule.
#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<FederatedAssertion>;
}

pub struct FederatedAssertion {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalClaims {
    sub: String,
    email: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevClaims {
    sub: String,
    email: String,
    name: Option<String>,
}

/// Verify a bearer credential, trying each path in order. `federated` is
/// `None` when no federated backend is configured.
pub async fn verify(
    token: &str,
    config: &AppConfig,
    federated: Option<&dyn FederatedVerifier>,
) -> HubResult<Principal> {
    let token = token.trim();
    if token.is_empty() {
        return Err(HubError::InvalidToken);
    }

    if let Some(fv) = federated {
        if let Some(assertion) = fv.verify(token).await {
            let display_name = assertion
                .display_name
                .unwrap_or_else(|| local_part(&assertion.email));
            return Ok(Principal {
                user_id: assertion.user_id,
                email: assertion.email,
                display_name,
                role: Role::User,
                avatar: None,
                origin: PrincipalOrigin::Verified,
            });
        }
    }

    if !config.auth.jwt_secret.is_empty() {
        if let Some(principal) = try_locally_signed(token, config) {
            return Ok(principal);
        }
    }

    if config.auth.allow_dev_tokens {
        if let Some(principal) = try_dev_token(token) {
            return Ok(principal);
        }
    }

    Err(HubError::InvalidToken)
}

fn try_locally_signed(token: &str, config: &AppConfig) -> Option<Principal> {
    let key = DecodingKey::from_secret(config.auth.jwt_secret.as_bytes());

    for alg_name in &config.auth.jwt_algorithms {
        let algorithm = match alg_name.as_str() {
            "HS256" => Algorithm::HS256,
            "RS256" => Algorithm::RS256,
            _ => continue,
        };
        // §4.1 step 2 only requires reading sub/email/name; it never
        // mandates an exp claim, so a token lacking one must not be
        // rejected as missing a required claim.
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        if let Ok(data) = jsonwebtoken::decode::<LocalClaims>(token, &key, &validation) {
            let display_name = data
                .claims
                .name
                .unwrap_or_else(|| local_part(&data.claims.email));
            return Some(Principal {
                user_id: data.claims.sub,
                email: data.claims.email,
                display_name,
                role: Role::User,
                avatar: None,
                origin: PrincipalOrigin::Verified,
            });
        }
    }
    None
}

/// Accept a well-formed, *unverified* three-segment assertion whose payload
/// carries `sub` and `email`. Gated entirely on `config.auth.allow_dev_tokens`
/// by the caller; this function does not check signatures at all.
fn try_dev_token(token: &str) -> Option<Principal> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segments[1])
        .ok()?;
    let claims: DevClaims = serde_json::from_slice(&payload).ok()?;

    let display_name = claims.name.unwrap_or_else(|| local_part(&claims.email));
    Some(Principal {
        user_id: format!("dev:{}", claims.sub),
        email: claims.email,
        display_name,
        role: Role::User,
        avatar: None,
        origin: PrincipalOrigin::AutoCreated,
    })
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_owned()
}

/// Build a synthetic, non-reusable guest principal for connections that
/// present no credential or fail all three verification paths under a
/// guest-admitting transport policy.
pub fn guest_principal() -> Principal {
    let guest_id = format!("guest-{}", uuid::Uuid::new_v4());
    Principal {
        user_id: guest_id.clone(),
        email: format!("{guest_id}@guest.local"),
        display_name: "Guest".to_owned(),
        role: Role::Guest,
        avatar: None,
        origin: PrincipalOrigin::Guest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        email: String,
        name: String,
    }

    fn test_config(secret: &str, allow_dev: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = secret.to_owned();
        config.auth.allow_dev_tokens = allow_dev;
        config
    }

    #[tokio::test]
    async fn rejects_empty_token() {
        let config = test_config("secret", false);
        let result = verify("   ", &config, None).await;
        assert!(matches!(result, Err(HubError::InvalidToken)));
    }

    #[tokio::test]
    async fn accepts_valid_hs256_token() {
        let config = test_config("top-secret", false);
        let claims = Claims {
            sub: "user-1".to_owned(),
            email: "alice@example.com".to_owned(),
            name: "Alice".to_owned(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"top-secret"),
        )
        .unwrap();

        let principal = verify(&token, &config, None).await.unwrap();
        assert_eq!(principal.user_id, "user-1");
        assert_eq!(principal.display_name, "Alice");
        assert!(matches!(principal.origin, PrincipalOrigin::Verified));
    }

    #[tokio::test]
    async fn rejects_token_with_wrong_secret() {
        let config = test_config("top-secret", false);
        let claims = Claims {
            sub: "user-1".to_owned(),
            email: "alice@example.com".to_owned(),
            name: "Alice".to_owned(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"wrong-secret"),
        )
        .unwrap();

        let result = verify(&token, &config, None).await;
        assert!(matches!(result, Err(HubError::InvalidToken)));
    }

    #[tokio::test]
    async fn dev_token_path_disabled_by_default() {
        let config = test_config("", false);
        let payload = serde_json::json!({"sub": "dev-user", "email": "dev@example.com"});
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&payload).unwrap());
        let token = format!("header.{encoded}.sig");

        let result = verify(&token, &config, None).await;
        assert!(matches!(result, Err(HubError::InvalidToken)));
    }

    #[tokio::test]
    async fn dev_token_path_accepted_when_enabled() {
        let config = test_config("", true);
        let payload = serde_json::json!({"sub": "dev-user", "email": "dev@example.com"});
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&payload).unwrap());
        let token = format!("header.{encoded}.sig");

        let principal = verify(&token, &config, None).await.unwrap();
        assert_eq!(principal.user_id, "dev:dev-user");
        assert!(matches!(principal.origin, PrincipalOrigin::AutoCreated));
    }
}
