//! OAuth 认证
//!
//! 读取持久化的凭据，过期时用 refresh token 刷新并写回。
//! 没有可用凭据时返回带授权地址的 `AuthorizationRequired`，浏览器授权流程由界面层负责。

use super::gdrive::GoogleDriveStore;
use super::RemoteStore;
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const REDIRECT_URI: &str = "http://localhost:8080/";
/// 提前刷新的余量（秒）
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// 持久化的凭据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthCredentials {
    /// 读取凭据文件，不存在时返回 None
    pub fn load(path: &Path) -> Result<Option<Self>, AuthError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AuthError::Credentials {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let io_err = |source| AuthError::Credentials {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// 没有过期时间时视为有效
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry
            .map(|t| t - Duration::seconds(EXPIRY_MARGIN_SECS) <= now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// 认证器：产出已连接的远程存储
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        client: &ClientConfig,
        credentials_path: &Path,
    ) -> Result<Arc<dyn RemoteStore>, AuthError>;
}

/// Google OAuth 认证器
pub struct GoogleAuthenticator {
    http: reqwest::Client,
    auth_url: String,
    token_url: String,
}

impl Default for GoogleAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleAuthenticator {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(super::IO_TIMEOUT_SECS))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// 用户需要在浏览器中打开的授权地址
    pub fn authorization_url(&self, client: &ClientConfig) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&client.client_id),
            urlencoding::encode(REDIRECT_URI),
            urlencoding::encode(DRIVE_SCOPE),
        )
    }

    /// 用 refresh token 换新的 access token
    pub async fn refresh(
        &self,
        client: &ClientConfig,
        credentials: &OAuthCredentials,
    ) -> Result<OAuthCredentials, AuthError> {
        let Some(refresh_token) = credentials.refresh_token.as_deref() else {
            return Err(AuthError::AuthorizationRequired {
                url: self.authorization_url(client),
            });
        };

        info!("刷新访问令牌");
        let form_body = format!(
            "grant_type=refresh_token&refresh_token={}&client_id={}&client_secret={}",
            urlencoding::encode(refresh_token),
            urlencoding::encode(&client.client_id),
            urlencoding::encode(&client.client_secret),
        );
        let resp = self
            .http
            .post(&self.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = resp.json().await?;
        Ok(apply_token(credentials, token, Utc::now()))
    }
}

/// 合并刷新结果；响应里没有新的 refresh token 时沿用旧的
fn apply_token(
    previous: &OAuthCredentials,
    token: TokenResponse,
    now: DateTime<Utc>,
) -> OAuthCredentials {
    OAuthCredentials {
        access_token: token.access_token,
        refresh_token: token.refresh_token.or_else(|| previous.refresh_token.clone()),
        token_expiry: token.expires_in.map(|s| now + Duration::seconds(s)),
        token_type: token.token_type.unwrap_or_else(|| previous.token_type.clone()),
    }
}

#[async_trait]
impl Authenticator for GoogleAuthenticator {
    async fn authenticate(
        &self,
        client: &ClientConfig,
        credentials_path: &Path,
    ) -> Result<Arc<dyn RemoteStore>, AuthError> {
        let Some(mut credentials) = OAuthCredentials::load(credentials_path)? else {
            return Err(AuthError::AuthorizationRequired {
                url: self.authorization_url(client),
            });
        };

        if credentials.is_expired(Utc::now()) {
            credentials = self.refresh(client, &credentials).await?;
            credentials.save(credentials_path)?;
            info!("已保存刷新后的凭据: {:?}", credentials_path);
        } else {
            debug!("访问令牌仍然有效");
        }

        Ok(Arc::new(GoogleDriveStore::new(
            self.http.clone(),
            credentials.access_token,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client() -> ClientConfig {
        ClientConfig {
            client_id: "id 1".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let mut creds = OAuthCredentials {
            access_token: "a".to_string(),
            refresh_token: None,
            token_expiry: None,
            token_type: default_token_type(),
        };
        assert!(!creds.is_expired(now));
        creds.token_expiry = Some(now + Duration::seconds(30));
        assert!(creds.is_expired(now));
        creds.token_expiry = Some(now + Duration::hours(1));
        assert!(!creds.is_expired(now));
    }

    #[test]
    fn test_apply_token_keeps_refresh_token() {
        let now = Utc::now();
        let previous = OAuthCredentials {
            access_token: "old".to_string(),
            refresh_token: Some("r".to_string()),
            token_expiry: None,
            token_type: default_token_type(),
        };
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3600}"#).unwrap();
        let next = apply_token(&previous, token, now);
        assert_eq!(next.access_token, "new");
        assert_eq!(next.refresh_token.as_deref(), Some("r"));
        assert_eq!(next.token_expiry, Some(now + Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn test_missing_credentials_require_authorization() {
        let dir = TempDir::new().unwrap();
        let auth = GoogleAuthenticator::new();
        let err = auth
            .authenticate(&client(), &dir.path().join("credentials.json"))
            .await
            .err()
            .unwrap();
        match err {
            AuthError::AuthorizationRequired { url } => {
                assert!(url.starts_with(GOOGLE_AUTH_URL));
                assert!(url.contains("client_id=id%201"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_valid_credentials_connect_without_network() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        OAuthCredentials {
            access_token: "token".to_string(),
            refresh_token: Some("r".to_string()),
            token_expiry: Some(Utc::now() + Duration::hours(1)),
            token_type: default_token_type(),
        }
        .save(&path)
        .unwrap();

        let store = GoogleAuthenticator::new()
            .authenticate(&client(), &path)
            .await
            .unwrap();
        assert_eq!(store.name(), "gdrive");
    }
}
