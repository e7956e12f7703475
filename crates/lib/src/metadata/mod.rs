//! Instance metadata service access.
//!
//! Session-token flavoured access (IMDSv2): a token is issued by a `PUT`
//! with a requested lifetime, then presented on every `GET`.

mod types;

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

pub use types::{ActionKind, InstanceAction};

/// Default metadata service root.
pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254";

/// Default lifetime requested for session tokens (six hours).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(21600);

const TOKEN_PATH: &str = "/latest/api/token";
const METADATA_PATH: &str = "/latest/meta-data";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Metadata key holding the instance id.
pub const KEY_INSTANCE_ID: &str = "instance-id";
/// Metadata key holding the availability zone.
pub const KEY_AVAILABILITY_ZONE: &str = "placement/availability-zone";
/// Metadata key carrying a pending spot interruption notice.
pub const KEY_SPOT_ACTION: &str = "spot/instance-action";

/// Errors that can occur while talking to the metadata service.
#[derive(Debug, Error)]
pub enum MetadataError {
  /// The request never produced a response (connect, timeout, body read).
  #[error("metadata request for {key} failed: {source}")]
  Http {
    key: String,
    #[source]
    source: reqwest::Error,
  },

  /// The service answered with a non-success status.
  #[error("metadata request for {key} returned HTTP {status}")]
  Status { key: String, status: u16 },

  /// The response body was not what the key promises.
  #[error("malformed metadata for {key}: {message}")]
  Malformed { key: String, message: String },
}

impl MetadataError {
  /// Whether this error came from the transport rather than the payload.
  pub fn is_network(&self) -> bool {
    matches!(self, MetadataError::Http { .. } | MetadataError::Status { .. })
  }
}

/// A short-lived capability token for metadata reads.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Debug for Token {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Token(..)")
  }
}

/// Source of instance identity facts and preemption notices.
#[allow(async_fn_in_trait)]
pub trait MetadataSource {
  /// Issue a fresh session token.
  async fn token(&self) -> Result<Token, MetadataError>;

  /// Read a metadata key as raw text.
  async fn get(&self, key: &str, token: &Token) -> Result<String, MetadataError>;

  /// Read the pending spot interruption notice, if any.
  async fn instance_action(&self, token: &Token) -> Result<Option<InstanceAction>, MetadataError>;
}

impl<T: MetadataSource + ?Sized> MetadataSource for &T {
  async fn token(&self) -> Result<Token, MetadataError> {
    (**self).token().await
  }

  async fn get(&self, key: &str, token: &Token) -> Result<String, MetadataError> {
    (**self).get(key, token).await
  }

  async fn instance_action(&self, token: &Token) -> Result<Option<InstanceAction>, MetadataError> {
    (**self).instance_action(token).await
  }
}

/// HTTP client for the instance metadata service.
#[derive(Debug, Clone)]
pub struct Imds {
  client: reqwest::Client,
  endpoint: String,
  token_ttl: Duration,
}

impl Imds {
  pub fn new(endpoint: impl Into<String>, token_ttl: Duration) -> Result<Self, MetadataError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(5))
      .build()
      .map_err(|source| MetadataError::Http {
        key: "client".to_string(),
        source,
      })?;
    Ok(Self {
      client,
      endpoint: endpoint.into().trim_end_matches('/').to_string(),
      token_ttl,
    })
  }

  fn key_url(&self, key: &str) -> String {
    format!("{}{}/{}", self.endpoint, METADATA_PATH, key.trim_start_matches('/'))
  }

  async fn fetch(&self, key: &str, token: &Token) -> Result<reqwest::Response, MetadataError> {
    let url = self.key_url(key);
    debug!(url = %url, "reading metadata");
    self
      .client
      .get(&url)
      .header(TOKEN_HEADER, token.as_str())
      .send()
      .await
      .map_err(|source| MetadataError::Http {
        key: key.to_string(),
        source,
      })
  }
}

impl MetadataSource for Imds {
  async fn token(&self) -> Result<Token, MetadataError> {
    let key = "api/token";
    let response = self
      .client
      .put(format!("{}{}", self.endpoint, TOKEN_PATH))
      .header(TOKEN_TTL_HEADER, self.token_ttl.as_secs().to_string())
      .send()
      .await
      .map_err(|source| MetadataError::Http {
        key: key.to_string(),
        source,
      })?;

    let response = ensure_success(key, response)?;
    let body = read_text(key, response).await?;
    if body.is_empty() {
      return Err(MetadataError::Malformed {
        key: key.to_string(),
        message: "empty token".to_string(),
      });
    }
    Ok(Token(body))
  }

  async fn get(&self, key: &str, token: &Token) -> Result<String, MetadataError> {
    let response = ensure_success(key, self.fetch(key, token).await?)?;
    read_text(key, response).await
  }

  async fn instance_action(&self, token: &Token) -> Result<Option<InstanceAction>, MetadataError> {
    let response = self.fetch(KEY_SPOT_ACTION, token).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let response = ensure_success(KEY_SPOT_ACTION, response)?;
    let body = read_text(KEY_SPOT_ACTION, response).await?;
    InstanceAction::parse(&body)
      .map(Some)
      .map_err(|e| MetadataError::Malformed {
        key: KEY_SPOT_ACTION.to_string(),
        message: e.to_string(),
      })
  }
}

fn ensure_success(key: &str, response: reqwest::Response) -> Result<reqwest::Response, MetadataError> {
  if response.status().is_success() {
    Ok(response)
  } else {
    Err(MetadataError::Status {
      key: key.to_string(),
      status: response.status().as_u16(),
    })
  }
}

async fn read_text(key: &str, response: reqwest::Response) -> Result<String, MetadataError> {
  response
    .text()
    .await
    .map(|body| body.trim().to_string())
    .map_err(|source| MetadataError::Http {
      key: key.to_string(),
      source,
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn client(server: &mockito::ServerGuard) -> Imds {
    Imds::new(server.url(), DEFAULT_TOKEN_TTL).unwrap()
  }

  #[tokio::test]
  async fn token_requests_ttl_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("PUT", "/latest/api/token")
      .match_header("x-aws-ec2-metadata-token-ttl-seconds", "21600")
      .with_body("session-token\n")
      .create_async()
      .await;

    let token = client(&server).await.token().await.unwrap();

    mock.assert_async().await;
    assert_eq!(token.as_str(), "session-token");
  }

  #[tokio::test]
  async fn get_presents_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/latest/meta-data/instance-id")
      .match_header("x-aws-ec2-metadata-token", "tok")
      .with_body("i-0abc")
      .create_async()
      .await;

    let id = client(&server)
      .await
      .get(KEY_INSTANCE_ID, &Token::new("tok"))
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(id, "i-0abc");
  }

  #[tokio::test]
  async fn get_surfaces_http_status() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/latest/meta-data/placement/availability-zone")
      .with_status(401)
      .create_async()
      .await;

    let err = client(&server)
      .await
      .get(KEY_AVAILABILITY_ZONE, &Token::new("stale"))
      .await
      .unwrap_err();

    assert!(matches!(err, MetadataError::Status { status: 401, .. }));
    assert!(err.is_network());
  }

  #[tokio::test]
  async fn missing_spot_notice_is_none() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/latest/meta-data/spot/instance-action")
      .with_status(404)
      .create_async()
      .await;

    let action = client(&server).await.instance_action(&Token::new("tok")).await.unwrap();
    assert!(action.is_none());
  }

  #[tokio::test]
  async fn pending_spot_notice_is_parsed() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/latest/meta-data/spot/instance-action")
      .with_body(r#"{"action": "terminate", "time": "2026-10-19T08:22:00Z"}"#)
      .create_async()
      .await;

    let action = client(&server)
      .await
      .instance_action(&Token::new("tok"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(action.action, ActionKind::Terminate);
    assert_eq!(action.time.as_deref(), Some("2026-10-19T08:22:00Z"));
  }

  #[tokio::test]
  async fn garbage_spot_notice_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/latest/meta-data/spot/instance-action")
      .with_body("not json")
      .create_async()
      .await;

    let err = client(&server)
      .await
      .instance_action(&Token::new("tok"))
      .await
      .unwrap_err();
    assert!(matches!(err, MetadataError::Malformed { .. }));
    assert!(!err.is_network());
  }
}
