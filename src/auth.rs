//! Azure AD OAuth2 authentication.
//!
//! Client-credentials (service-principal) flow against the Microsoft
//! Identity Platform v2.0 token endpoint, with an expiry-aware cached token.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, MigrateResult};

/// Service-principal credentials plus the subscription the migration
/// infrastructure lives in.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
    /// Resource group holding the recovery vault and migrate project.
    pub resource_group: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.tenant_id.is_empty()
            && !self.subscription_id.is_empty()
    }
}

/// Cached bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp,
            None => false,
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Token endpoint URL for a given tenant.
fn token_url(tenant_id: &str) -> String {
    format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        tenant_id
    )
}

/// Acquire a management-plane token using the client-credentials grant.
pub async fn acquire_token(http: &reqwest::Client, creds: &Credentials) -> MigrateResult<Token> {
    if !creds.is_complete() {
        return Err(MigrateError::auth(
            "client_id, client_secret, tenant_id and subscription_id are all required",
        ));
    }

    let url = token_url(&creds.tenant_id);
    debug!("token request → {}", url);

    let form: Vec<(&str, &str)> = vec![
        ("grant_type", "client_credentials"),
        ("client_id", &creds.client_id),
        ("client_secret", &creds.client_secret),
        ("scope", "https://management.azure.com/.default"),
    ];

    let resp = http
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|e| MigrateError::network(format!("{e}")))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(MigrateError::auth(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let raw: TokenResponse = resp
        .json()
        .await
        .map_err(|e| MigrateError::parse(format!("token response: {e}")))?;
    Ok(token_from_response(raw))
}

fn token_from_response(resp: TokenResponse) -> Token {
    // Refresh one minute early to avoid using a token at its expiry edge.
    let expires_at = resp
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs.saturating_sub(60) as i64));
    Token {
        access_token: resp.access_token,
        token_type: resp.token_type,
        expires_at,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_credentials_rejected() {
        let creds = Credentials {
            client_id: "c".into(),
            ..Default::default()
        };
        assert!(!creds.is_complete());
    }

    #[test]
    fn complete_credentials_accepted() {
        let creds = Credentials {
            client_id: "c".into(),
            client_secret: "s".into(),
            tenant_id: "t".into(),
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
        };
        assert!(creds.is_complete());
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let t = Token {
            access_token: "abc".into(),
            token_type: "Bearer".into(),
            expires_at: None,
        };
        assert!(!t.is_expired());
        assert!(t.is_usable());
    }

    #[test]
    fn expired_token_not_usable() {
        let t = Token {
            access_token: "abc".into(),
            token_type: "Bearer".into(),
            expires_at: Some(Utc::now() - Duration::hours(1)),
        };
        assert!(t.is_expired());
        assert!(!t.is_usable());
    }

    #[test]
    fn empty_token_not_usable() {
        assert!(!Token::default().is_usable());
    }

    #[test]
    fn token_from_response_shaves_a_minute() {
        let t = token_from_response(TokenResponse {
            access_token: "abc".into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
        });
        let exp = t.expires_at.unwrap();
        assert!(exp > Utc::now() + Duration::seconds(3400));
        assert!(exp < Utc::now() + Duration::seconds(3600));
    }

    #[test]
    fn token_url_format() {
        assert_eq!(
            token_url("tenant-1"),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
    }
}
