//! Remote bookmark service client.
//!
//! REST over HTTPS with bearer auth and cursor pagination. The trait is the
//! seam the sync orchestrators run against; the reqwest implementation
//! talks to the live service.

use crate::config::SyncConfig;
use crate::error::{CoreError, Result};
use crate::http_pool::{self, ClientKey, PoolSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// A tag on a remote bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkTag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub count: Option<u64>,
}

/// A remote bookmark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<BookmarkTag>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub favourited: bool,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "modifiedAt")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Bookmark {
    /// Whether any tag carries the given name.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name)
    }

    /// Id of the tag with the given name, for detach calls.
    pub fn tag_id(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.id.as_str())
    }
}

/// One page of bookmarks plus the cursor for the next.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookmarkPage {
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    #[serde(default, alias = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Partial update for a bookmark; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct BookmarkUpdate {
    pub title: Option<String>,
    pub note: Option<String>,
    pub favourited: Option<bool>,
    pub archived: Option<bool>,
}

/// Client surface the sync orchestrators depend on.
#[async_trait]
pub trait BookmarkClient: Send + Sync {
    /// Cheap liveness probe; every public sync entry point calls this
    /// before doing real work.
    async fn health_check(&self) -> bool;

    async fn get_bookmarks(&self, limit: usize, cursor: Option<&str>) -> Result<BookmarkPage>;
    async fn get_bookmark(&self, id: &str) -> Result<Bookmark>;
    async fn create_bookmark(
        &self,
        url: &str,
        title: Option<&str>,
        note: Option<&str>,
    ) -> Result<Bookmark>;
    async fn update_bookmark(&self, id: &str, update: BookmarkUpdate) -> Result<Bookmark>;
    async fn delete_bookmark(&self, id: &str) -> Result<()>;
    async fn attach_tags(&self, id: &str, tags: &[String]) -> Result<()>;
    async fn detach_tag(&self, id: &str, tag_id: &str) -> Result<()>;
    async fn get_tags(&self) -> Result<Vec<BookmarkTag>>;
    async fn search_bookmarks(&self, query: &str, limit: usize) -> Result<Vec<Bookmark>>;

    /// Drain every page into memory. Fine for typical libraries; use the
    /// cache's pager for bounded-memory traversal.
    async fn get_all_bookmarks(&self) -> Result<Vec<Bookmark>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.get_bookmarks(100, cursor.as_deref()).await?;
            all.extend(page.bookmarks);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(all)
    }
}

/// reqwest-backed client against the configured base URL.
pub struct RemoteBookmarkClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for RemoteBookmarkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBookmarkClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RemoteBookmarkClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_secs(30);
        let key = ClientKey::new(&config.api_url, timeout, 10, Some(&config.api_key));
        let settings = PoolSettings {
            timeout,
            ..PoolSettings::default()
        };
        Ok(Self {
            client: http_pool::acquire(&key, &settings)?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Http {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }
        Ok(response.json().await?)
    }

    async fn expect_ok(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Http {
                status: status.as_u16(),
                body,
                retry_after: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BookmarkClient for RemoteBookmarkClient {
    async fn health_check(&self) -> bool {
        match self
            .request(reqwest::Method::GET, "/bookmarks?limit=1")
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "bookmark_health_check_failed");
                false
            }
        }
    }

    async fn get_bookmarks(&self, limit: usize, cursor: Option<&str>) -> Result<BookmarkPage> {
        let mut path = format!("/bookmarks?limit={limit}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={cursor}"));
        }
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        Self::expect_json(response).await
    }

    async fn get_bookmark(&self, id: &str) -> Result<Bookmark> {
        let response = self
            .request(reqwest::Method::GET, &format!("/bookmarks/{id}"))
            .send()
            .await?;
        Self::expect_json(response).await
    }

    async fn create_bookmark(
        &self,
        url: &str,
        title: Option<&str>,
        note: Option<&str>,
    ) -> Result<Bookmark> {
        let mut body = json!({"type": "link", "url": url});
        if let Some(title) = title {
            body["title"] = json!(title);
        }
        if let Some(note) = note {
            body["note"] = json!(note);
        }
        let response = self
            .request(reqwest::Method::POST, "/bookmarks")
            .json(&body)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    async fn update_bookmark(&self, id: &str, update: BookmarkUpdate) -> Result<Bookmark> {
        let mut body = serde_json::Map::new();
        if let Some(title) = update.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(note) = update.note {
            body.insert("note".into(), json!(note));
        }
        if let Some(favourited) = update.favourited {
            body.insert("favourited".into(), json!(favourited));
        }
        if let Some(archived) = update.archived {
            body.insert("archived".into(), json!(archived));
        }
        let response = self
            .request(reqwest::Method::PATCH, &format!("/bookmarks/{id}"))
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;
        Self::expect_json(response).await
    }

    async fn delete_bookmark(&self, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/bookmarks/{id}"))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn attach_tags(&self, id: &str, tags: &[String]) -> Result<()> {
        let body = json!({
            "tags": tags.iter().map(|name| json!({"tagName": name})).collect::<Vec<_>>()
        });
        let response = self
            .request(reqwest::Method::POST, &format!("/bookmarks/{id}/tags"))
            .json(&body)
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn detach_tag(&self, id: &str, tag_id: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/bookmarks/{id}/tags/{tag_id}"),
            )
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn get_tags(&self) -> Result<Vec<BookmarkTag>> {
        #[derive(Deserialize)]
        struct TagsEnvelope {
            #[serde(default)]
            tags: Vec<BookmarkTag>,
        }
        let response = self.request(reqwest::Method::GET, "/tags").send().await?;
        let envelope: TagsEnvelope = Self::expect_json(response).await?;
        Ok(envelope.tags)
    }

    async fn search_bookmarks(&self, query: &str, limit: usize) -> Result<Vec<Bookmark>> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/bookmarks/search?q={encoded}&limit={limit}"),
            )
            .send()
            .await?;
        let page: BookmarkPage = Self::expect_json(response).await?;
        Ok(page.bookmarks)
    }
}
