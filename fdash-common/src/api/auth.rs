//! Authentication request/response types
//!
//! `POST /auth/login` exchanges an identifier/secret pair for an access token,
//! a refresh token and the tenant the user acts for. `POST /auth/refresh`
//! trades the refresh token for a new access token.

use serde::{Deserialize, Serialize};

/// Login request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub tenant_id: String,
    /// Profile of the authenticated user (absent on older service versions)
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Profile returned alongside the credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Refresh request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Refresh response body
///
/// Some deployments rotate the refresh token on use; when they do the new one
/// is returned here and must replace the stored one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_without_profile() {
        let json = r#"{"access_token":"a","refresh_token":"r","tenant_id":"t1"}"#;
        let parsed: LoginResponse = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.tenant_id, "t1");
        assert!(parsed.user.is_none());
    }

    #[test]
    fn test_refresh_response_optional_rotation() {
        let plain: RefreshResponse = serde_json::from_str(r#"{"access_token":"a2"}"#).unwrap();
        assert!(plain.refresh_token.is_none());

        let rotated: RefreshResponse =
            serde_json::from_str(r#"{"access_token":"a2","refresh_token":"r2"}"#).unwrap();
        assert_eq!(rotated.refresh_token.as_deref(), Some("r2"));
    }
}
