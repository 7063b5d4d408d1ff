//! Thin client for the X API v2
//!
//! One method per operation the CLI exposes. Each request carries the
//! resolved bearer token, non-2xx responses map to [`ApiError::Status`]
//! with the most useful detail string the error body offers, and response
//! models keep only the fields the terminal output shows. No pagination,
//! no retries, no rate-limit bookkeeping here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://api.x.com/2";

/// Most responses arrive as `{"data": ...}`.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// List responses omit `data` entirely when nothing matched.
#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetrics {
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub tweet_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_metrics: Option<UserMetrics>,
}

#[derive(Debug, Deserialize)]
struct Deleted {
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct FollowState {
    following: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmSent {
    pub dm_conversation_id: String,
    pub dm_event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub trend_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweet_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("chirp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Network)?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach auth, send, and map non-2xx to an error with body detail.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            detail: extract_detail(&body),
        }
        .into())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.send(self.client.get(self.url(path)).query(query)).await?;
        Ok(response.json().await.map_err(ApiError::Network)?)
    }

    pub async fn create_post(&self, text: &str, reply_to: Option<&str>) -> Result<Post> {
        let mut body = serde_json::json!({ "text": text });
        if let Some(reply_to) = reply_to {
            body["reply"] = serde_json::json!({ "in_reply_to_tweet_id": reply_to });
        }
        let response = self
            .send(self.client.post(self.url("/tweets")).json(&body))
            .await?;
        let envelope: DataEnvelope<Post> = response.json().await.map_err(ApiError::Network)?;
        Ok(envelope.data)
    }

    /// Returns whether the API confirmed the deletion.
    pub async fn delete_post(&self, id: &str) -> Result<bool> {
        let response = self
            .send(self.client.delete(self.url(&format!("/tweets/{}", id))))
            .await?;
        let envelope: DataEnvelope<Deleted> = response.json().await.map_err(ApiError::Network)?;
        Ok(envelope.data.deleted)
    }

    pub async fn get_post(&self, id: &str) -> Result<Post> {
        let envelope: DataEnvelope<Post> = self
            .get_json(
                &format!("/tweets/{}", id),
                &[("tweet.fields", "created_at,author_id".to_string())],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn search_posts(&self, query: &str, limit: u32) -> Result<Vec<Post>> {
        let envelope: ListEnvelope<Post> = self
            .get_json(
                "/tweets/search/recent",
                &[
                    ("query", query.to_string()),
                    ("max_results", limit.to_string()),
                    ("tweet.fields", "created_at,author_id".to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn home_timeline(&self, user_id: &str, limit: u32) -> Result<Vec<Post>> {
        let envelope: ListEnvelope<Post> = self
            .get_json(
                &format!("/users/{}/timelines/reverse_chronological", user_id),
                &[
                    ("max_results", limit.to_string()),
                    ("tweet.fields", "created_at,author_id".to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn user_timeline(&self, user_id: &str, limit: u32) -> Result<Vec<Post>> {
        let envelope: ListEnvelope<Post> = self
            .get_json(
                &format!("/users/{}/tweets", user_id),
                &[
                    ("max_results", limit.to_string()),
                    ("tweet.fields", "created_at,author_id".to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }

    /// The authenticated user.
    pub async fn me(&self) -> Result<User> {
        let envelope: DataEnvelope<User> = self
            .get_json(
                "/users/me",
                &[("user.fields", "description,public_metrics".to_string())],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn user_by_username(&self, username: &str) -> Result<User> {
        let handle = username.trim_start_matches('@');
        let envelope: DataEnvelope<User> = self
            .get_json(
                &format!("/users/by/username/{}", handle),
                &[("user.fields", "description,public_metrics".to_string())],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn follow(&self, source_user_id: &str, target_user_id: &str) -> Result<()> {
        let body = serde_json::json!({ "target_user_id": target_user_id });
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/users/{}/following", source_user_id)))
                    .json(&body),
            )
            .await?;
        let _: DataEnvelope<FollowState> = response.json().await.map_err(ApiError::Network)?;
        Ok(())
    }

    pub async fn unfollow(&self, source_user_id: &str, target_user_id: &str) -> Result<()> {
        let response = self
            .send(self.client.delete(self.url(&format!(
                "/users/{}/following/{}",
                source_user_id, target_user_id
            ))))
            .await?;
        let _: DataEnvelope<FollowState> = response.json().await.map_err(ApiError::Network)?;
        Ok(())
    }

    pub async fn send_dm(&self, participant_id: &str, text: &str) -> Result<DmSent> {
        let body = serde_json::json!({ "text": text });
        let response = self
            .send(
                self.client
                    .post(self.url(&format!(
                        "/dm_conversations/with/{}/messages",
                        participant_id
                    )))
                    .json(&body),
            )
            .await?;
        let envelope: DataEnvelope<DmSent> = response.json().await.map_err(ApiError::Network)?;
        Ok(envelope.data)
    }

    pub async fn list_dm_events(&self, limit: u32) -> Result<Vec<DmEvent>> {
        let envelope: ListEnvelope<DmEvent> = self
            .get_json(
                "/dm_events",
                &[
                    ("max_results", limit.to_string()),
                    ("dm_event.fields", "text,sender_id,event_type".to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn owned_lists(&self, user_id: &str) -> Result<Vec<ListInfo>> {
        let envelope: ListEnvelope<ListInfo> = self
            .get_json(
                &format!("/users/{}/owned_lists", user_id),
                &[("list.fields", "description".to_string())],
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn create_list(&self, name: &str, description: Option<&str>) -> Result<ListInfo> {
        let mut body = serde_json::json!({ "name": name });
        if let Some(description) = description {
            body["description"] = serde_json::json!(description);
        }
        let response = self
            .send(self.client.post(self.url("/lists")).json(&body))
            .await?;
        let envelope: DataEnvelope<ListInfo> = response.json().await.map_err(ApiError::Network)?;
        Ok(envelope.data)
    }

    pub async fn trends(&self, woeid: u32) -> Result<Vec<Trend>> {
        let envelope: ListEnvelope<Trend> = self
            .get_json(&format!("/trends/by/woeid/{}", woeid), &[])
            .await?;
        Ok(envelope.data)
    }

    pub async fn upload_media(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<Media> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(ApiError::Network)?;
        let form = reqwest::multipart::Form::new().part("media", part);
        let response = self
            .send(self.client.post(self.url("/media/upload")).multipart(form))
            .await?;
        let envelope: DataEnvelope<Media> = response.json().await.map_err(ApiError::Network)?;
        Ok(envelope.data)
    }
}

/// Pull the most useful human-readable string out of an error body. The
/// API speaks several error dialects; try them in order and fall back to
/// the raw body.
fn extract_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "title", "error_description", "error"] {
            if let Some(detail) = value.get(key).and_then(|v| v.as_str()) {
                return detail.to_string();
            }
        }
        if let Some(message) = value
            .get("errors")
            .and_then(|errors| errors.get(0))
            .and_then(|first| first.get("message"))
            .and_then(|message| message.as_str())
        {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}
