//! Resilient Graph API client

use std::sync::Arc;
use std::time::Duration;

use mailvault_common::cache::TokenCache;
use mailvault_domain::{MailDetail, MailFolder, MailMessage, MailVaultError, Result};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Default OAuth token endpoint.
pub const GRAPH_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
/// Default Graph resource API base.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Remaining validity reported for cache hits; callers must not rely on its
/// precision.
const NOMINAL_CACHED_EXPIRY_SECS: i64 = 3600;

/// Configuration for the Graph client
#[derive(Debug, Clone)]
pub struct GraphClientConfig {
    /// OAuth token endpoint
    pub token_url: String,
    /// Resource API base URL (e.g. "https://graph.microsoft.com/v1.0")
    pub api_base: String,
    /// Fixed timeout applied to every outbound call
    pub timeout: Duration,
    /// Total attempts for rate-limited requests (initial try + retries)
    pub max_attempts: usize,
    /// Base delay when the server does not provide Retry-After; grows
    /// linearly with the attempt number
    pub retry_base_delay: Duration,
}

impl Default for GraphClientConfig {
    fn default() -> Self {
        Self {
            token_url: GRAPH_TOKEN_URL.to_string(),
            api_base: GRAPH_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// HTTP client for the OAuth token endpoint and the mail resource API.
///
/// Only rate limiting is special-cased here: a 429 is retried up to the
/// configured budget, every other response is handed back to the caller.
pub struct GraphClient {
    http: reqwest::Client,
    config: GraphClientConfig,
    tokens: Arc<TokenCache>,
}

impl GraphClient {
    pub fn new(config: GraphClientConfig, tokens: Arc<TokenCache>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build().map_err(|e| {
            MailVaultError::Internal(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { http, config, tokens })
    }

    /// Exchange a refresh token for an access token.
    ///
    /// With an `account_id`, a cached token is returned immediately (with a
    /// nominal remaining validity) and a fresh token is cached after a live
    /// exchange. Returns `(access_token, expires_in_seconds)`.
    pub async fn exchange_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        account_id: Option<&str>,
    ) -> Result<(String, i64)> {
        if let Some(account_id) = account_id {
            if let Some(cached) = self.tokens.get(account_id) {
                debug!(account_id = %account_id, "token cache hit");
                return Ok((cached, NOMINAL_CACHED_EXPIRY_SECS));
            }
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", client_id),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(token_error(status, &body));
        }

        let payload: TokenResponse = response.json().await.map_err(|e| {
            MailVaultError::auth(format!("malformed token response: {e}"))
        })?;
        let expires_in = payload.expires_in.unwrap_or(NOMINAL_CACHED_EXPIRY_SECS);

        if let Some(account_id) = account_id {
            self.tokens.set(account_id, payload.access_token.clone(), expires_in.max(0) as u64);
        }

        Ok((payload.access_token, expires_in))
    }

    /// Live check of an account's credentials. Never fails; any error of any
    /// kind is reported as `(false, message)`.
    pub async fn verify_account(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> (bool, Option<String>) {
        match self.exchange_token(refresh_token, client_id, None).await {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    /// Issue an authenticated resource request.
    ///
    /// Retries only on HTTP 429, sleeping for the server-provided
    /// `Retry-After` (or a linearly increasing default) between attempts;
    /// persistent throttling exhausts the budget as
    /// [`MailVaultError::RateLimited`]. Any other response, success or not,
    /// is returned as-is for the caller to interpret.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.config.api_base, path);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 0..attempts {
            let mut builder = self.http.request(method.clone(), &url).bearer_auth(access_token);
            if let Some(query) = query {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(transport_error)?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 < attempts {
                    let delay = retry_after(&response)
                        .unwrap_or(self.config.retry_base_delay * (attempt as u32 + 1));
                    warn!(
                        path = %path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(MailVaultError::RateLimited(format!(
                    "{path} still throttled after {attempts} attempts"
                )));
            }

            return Ok(response);
        }

        Err(MailVaultError::Internal(
            "request loop exhausted attempts without producing a result".into(),
        ))
    }

    /// List mail folders with their message counters.
    pub async fn list_folders(&self, access_token: &str) -> Result<Vec<MailFolder>> {
        let query = [("$select", "id,displayName,unreadItemCount,totalItemCount".to_string())];
        let response =
            self.request(Method::GET, "/me/mailFolders", access_token, Some(&query), None).await?;
        let response = expect_success(response, "list mail folders").await?;

        let payload: FolderListResponse = parse_json(response, "folder list").await?;
        Ok(payload
            .value
            .into_iter()
            .map(|f| MailFolder {
                id: f.id,
                name: f.display_name,
                unread_count: f.unread_item_count,
                total_count: f.total_item_count,
            })
            .collect())
    }

    /// List messages in a folder, newest first. Returns the page and the
    /// folder's total match count.
    pub async fn list_messages(
        &self,
        access_token: &str,
        folder: &str,
        limit: usize,
        skip: usize,
        search: Option<&str>,
    ) -> Result<(Vec<MailMessage>, i64)> {
        let mut query = vec![
            ("$select", "id,subject,from,receivedDateTime,isRead,bodyPreview".to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$top", limit.to_string()),
            ("$skip", skip.to_string()),
            ("$count", "true".to_string()),
        ];
        if let Some(search) = search {
            query.push(("$search", format!("\"{search}\"")));
        }

        let path = format!("/me/mailFolders/{folder}/messages");
        let response = self.request(Method::GET, &path, access_token, Some(&query), None).await?;
        let response = expect_success(response, "list messages").await?;

        let payload: MessageListResponse = parse_json(response, "message list").await?;
        let total = payload.count.unwrap_or(0);
        let messages = payload
            .value
            .into_iter()
            .map(|m| {
                let from = m.from.unwrap_or_default().email_address;
                MailMessage {
                    id: m.id,
                    subject: m.subject,
                    from_address: from.address,
                    from_name: from.name,
                    received_at: m.received_date_time,
                    is_read: m.is_read,
                    body_preview: m.body_preview,
                }
            })
            .collect();

        Ok((messages, total))
    }

    /// Full details of one message.
    pub async fn message_detail(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MailDetail> {
        let query = [(
            "$select",
            "id,subject,from,toRecipients,ccRecipients,receivedDateTime,isRead,body".to_string(),
        )];
        let path = format!("/me/messages/{message_id}");
        let response = self.request(Method::GET, &path, access_token, Some(&query), None).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailVaultError::NotFound("message not found".to_string()));
        }
        let response = expect_success(response, "get message").await?;

        let m: MessageDetailResponse = parse_json(response, "message detail").await?;
        let from = m.from.unwrap_or_default().email_address;
        let body = m.body.unwrap_or_default();

        Ok(MailDetail {
            id: m.id,
            subject: m.subject,
            from_address: from.address,
            from_name: from.name,
            to: recipient_addresses(m.to_recipients),
            cc: recipient_addresses(m.cc_recipients),
            received_at: m.received_date_time,
            is_read: m.is_read,
            body_content: body.content,
            body_type: body.content_type.unwrap_or_else(|| "text".to_string()),
        })
    }

    /// Delete a message (the provider moves it to Deleted Items).
    pub async fn delete_message(&self, access_token: &str, message_id: &str) -> Result<()> {
        let path = format!("/me/messages/{message_id}");
        let response = self.request(Method::DELETE, &path, access_token, None, None).await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(MailVaultError::NotFound("message not found".to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(MailVaultError::Network(format!("delete message failed ({status}): {body}")))
            }
        }
    }

    /// Unread message count for a folder.
    pub async fn unread_count(&self, access_token: &str, folder: &str) -> Result<i64> {
        let query = [("$select", "unreadItemCount".to_string())];
        let path = format!("/me/mailFolders/{folder}");
        let response = self.request(Method::GET, &path, access_token, Some(&query), None).await?;
        let response = expect_success(response, "get unread count").await?;

        let payload: UnreadCountResponse = parse_json(response, "unread count").await?;
        Ok(payload.unread_item_count)
    }
}

fn transport_error(err: reqwest::Error) -> MailVaultError {
    if err.is_timeout() {
        MailVaultError::Network(format!("request timed out: {err}"))
    } else {
        MailVaultError::Network(format!("request failed: {err}"))
    }
}

fn token_error(status: StatusCode, body: &str) -> MailVaultError {
    #[derive(Deserialize)]
    struct TokenErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_description: Option<String>,
    }

    match serde_json::from_str::<TokenErrorBody>(body) {
        Ok(parsed) if parsed.error.is_some() || parsed.error_description.is_some() => {
            let code = parsed.error.clone().unwrap_or_default();
            let message = parsed
                .error_description
                .or(parsed.error)
                .unwrap_or_else(|| "unknown error".to_string());
            MailVaultError::Auth { code, message }
        }
        _ => MailVaultError::auth(format!("HTTP {}", status.as_u16())),
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn expect_success(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MailVaultError::Network(format!("{operation} failed ({status}): {body}")))
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| MailVaultError::Internal(format!("failed to parse {what} response: {e}")))
}

fn recipient_addresses(recipients: Vec<GraphRecipient>) -> Vec<String> {
    recipients.into_iter().map(|r| r.email_address.address.unwrap_or_default()).collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FolderListResponse {
    #[serde(default)]
    value: Vec<GraphFolder>,
}

#[derive(Debug, Deserialize)]
struct GraphFolder {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "unreadItemCount", default)]
    unread_item_count: i64,
    #[serde(rename = "totalItemCount", default)]
    total_item_count: i64,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.count", default)]
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(rename = "receivedDateTime", default)]
    received_date_time: Option<String>,
    #[serde(rename = "isRead", default)]
    is_read: bool,
    #[serde(rename = "bodyPreview", default)]
    body_preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDetailResponse {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients", default)]
    to_recipients: Vec<GraphRecipient>,
    #[serde(rename = "ccRecipients", default)]
    cc_recipients: Vec<GraphRecipient>,
    #[serde(rename = "receivedDateTime", default)]
    received_date_time: Option<String>,
    #[serde(rename = "isRead", default)]
    is_read: bool,
    #[serde(default)]
    body: Option<GraphItemBody>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress", default)]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Default, Deserialize)]
struct GraphEmailAddress {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphItemBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "contentType", default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    #[serde(rename = "unreadItemCount", default)]
    unread_item_count: i64,
}
