//! Bookmark caching and pagination for one sync run.
//!
//! The URL index and full bookmark list are expensive to build (a paginated
//! crawl of the whole remote library), so a full sync wraps its phases in
//! [`BookmarkCache::scope`] to build them once. Outside a scope nothing is
//! cached; independent calls never see each other's state.

use crate::error::Result;
use crate::sync::bookmarks::{Bookmark, BookmarkClient};
use crate::url_norm::normalize_url;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Page size used for remote enumeration.
pub const BOOKMARK_PAGE_SIZE: usize = 100;

#[derive(Default)]
struct CacheState {
    url_index: Option<HashMap<String, Bookmark>>,
    bookmarks: Option<Vec<Bookmark>>,
    reuse: bool,
}

/// Scoped cache of remote bookmark state.
#[derive(Default)]
pub struct BookmarkCache {
    state: Mutex<CacheState>,
}

/// Guard returned by [`BookmarkCache::scope`]; dropping it restores the
/// previous reuse flag.
pub struct CacheScope {
    cache: Arc<BookmarkCache>,
    previous: bool,
}

impl Drop for CacheScope {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock().expect("cache lock poisoned");
        state.reuse = self.previous;
    }
}

impl BookmarkCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enable cache reuse for the lifetime of the returned guard. Prior
    /// caches are cleared on entry so the scope starts fresh.
    pub fn scope(self: &Arc<Self>) -> CacheScope {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let previous = state.reuse;
        state.reuse = true;
        state.url_index = None;
        state.bookmarks = None;
        CacheScope {
            cache: self.clone(),
            previous,
        }
    }

    pub fn reuse_enabled(&self) -> bool {
        self.state.lock().expect("cache lock poisoned").reuse
    }

    /// Drop cached data unless a scope wants it kept.
    pub fn clear_if_not_reusing(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        if !state.reuse {
            state.url_index = None;
            state.bookmarks = None;
        }
    }

    /// The cached full bookmark list, only inside a reuse scope.
    pub fn cached_bookmarks(&self) -> Option<Vec<Bookmark>> {
        let state = self.state.lock().expect("cache lock poisoned");
        if state.reuse {
            state.bookmarks.clone()
        } else {
            None
        }
    }

    /// Normalized-URL → bookmark index over the whole remote library.
    /// Idempotent inside a scope: the first call pages the remote, later
    /// calls hit memory.
    pub async fn get_url_index(
        &self,
        client: &dyn BookmarkClient,
    ) -> Result<HashMap<String, Bookmark>> {
        {
            let state = self.state.lock().expect("cache lock poisoned");
            if state.reuse {
                if let Some(index) = &state.url_index {
                    tracing::debug!(count = index.len(), "bookmark_url_index_cache_hit");
                    return Ok(index.clone());
                }
            }
        }

        let mut index = HashMap::new();
        let mut bookmarks = Vec::new();
        let mut cursor: Option<String> = None;
        let mut batches = 0u32;
        loop {
            let page = client
                .get_bookmarks(BOOKMARK_PAGE_SIZE, cursor.as_deref())
                .await?;
            batches += 1;
            for bookmark in page.bookmarks {
                if let Some(url) = &bookmark.url {
                    let normalized = normalize_url(url).unwrap_or_else(|| url.clone());
                    index.insert(normalized, bookmark.clone());
                }
                bookmarks.push(bookmark);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(bookmark_count = index.len(), batches, "bookmark_url_index_built");

        let mut state = self.state.lock().expect("cache lock poisoned");
        if state.reuse {
            state.url_index = Some(index.clone());
            state.bookmarks = Some(bookmarks);
        }
        Ok(index)
    }

    /// The full bookmark list, cached inside a scope.
    pub async fn get_bookmarks(&self, client: &dyn BookmarkClient) -> Result<Vec<Bookmark>> {
        {
            let state = self.state.lock().expect("cache lock poisoned");
            if state.reuse {
                if let Some(bookmarks) = &state.bookmarks {
                    tracing::debug!(count = bookmarks.len(), "bookmarks_cache_hit");
                    return Ok(bookmarks.clone());
                }
            }
        }

        let bookmarks = client.get_all_bookmarks().await?;
        let mut state = self.state.lock().expect("cache lock poisoned");
        if state.reuse {
            state.bookmarks = Some(bookmarks.clone());
        }
        Ok(bookmarks)
    }

    /// Unbuffered page-by-page enumeration for bounded-memory traversal of
    /// very large libraries.
    pub fn iter_bookmarks<'a>(&self, client: &'a dyn BookmarkClient) -> BookmarkPager<'a> {
        BookmarkPager {
            client,
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
            count: 0,
        }
    }
}

/// Cursor-driven pager yielding `(normalized_url, bookmark)` pairs.
pub struct BookmarkPager<'a> {
    client: &'a dyn BookmarkClient,
    cursor: Option<String>,
    buffer: VecDeque<Bookmark>,
    done: bool,
    count: u64,
}

impl BookmarkPager<'_> {
    /// Next bookmark with a URL, or `None` when the library is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, Bookmark)>> {
        loop {
            if let Some(bookmark) = self.buffer.pop_front() {
                let Some(url) = bookmark.url.clone() else {
                    continue;
                };
                let normalized = normalize_url(&url).unwrap_or(url);
                self.count += 1;
                return Ok(Some((normalized, bookmark)));
            }
            if self.done {
                tracing::info!(bookmark_count = self.count, "bookmarks_iterated");
                return Ok(None);
            }
            let page = self
                .client
                .get_bookmarks(BOOKMARK_PAGE_SIZE, self.cursor.as_deref())
                .await?;
            self.buffer.extend(page.bookmarks);
            match page.next_cursor {
                Some(next) => self.cursor = Some(next),
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bookmarks::{BookmarkPage, BookmarkTag, BookmarkUpdate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct PagedClient {
        pages: Vec<BookmarkPage>,
        calls: AtomicU32,
    }

    impl PagedClient {
        fn new(pages: Vec<BookmarkPage>) -> Self {
            Self {
                pages,
                calls: AtomicU32::new(0),
            }
        }

        fn two_pages() -> Self {
            let a = Bookmark {
                id: "a".into(),
                url: Some("https://example.com/A/?utm_source=x".into()),
                ..Bookmark::default()
            };
            let b = Bookmark {
                id: "b".into(),
                url: Some("https://example.com/b".into()),
                ..Bookmark::default()
            };
            let no_url = Bookmark {
                id: "c".into(),
                ..Bookmark::default()
            };
            Self::new(vec![
                BookmarkPage {
                    bookmarks: vec![a, no_url],
                    next_cursor: Some("cur1".into()),
                },
                BookmarkPage {
                    bookmarks: vec![b],
                    next_cursor: None,
                },
            ])
        }
    }

    #[async_trait]
    impl BookmarkClient for PagedClient {
        async fn health_check(&self) -> bool {
            true
        }

        async fn get_bookmarks(&self, _limit: usize, cursor: Option<&str>) -> Result<BookmarkPage> {
            let index = match cursor {
                None => 0,
                Some("cur1") => 1,
                Some(other) => panic!("unexpected cursor {other}"),
            };
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages[index].clone())
        }

        async fn get_bookmark(&self, _id: &str) -> Result<Bookmark> {
            unimplemented!()
        }
        async fn create_bookmark(
            &self,
            _url: &str,
            _title: Option<&str>,
            _note: Option<&str>,
        ) -> Result<Bookmark> {
            unimplemented!()
        }
        async fn update_bookmark(&self, _id: &str, _update: BookmarkUpdate) -> Result<Bookmark> {
            unimplemented!()
        }
        async fn delete_bookmark(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn attach_tags(&self, _id: &str, _tags: &[String]) -> Result<()> {
            unimplemented!()
        }
        async fn detach_tag(&self, _id: &str, _tag_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn get_tags(&self) -> Result<Vec<BookmarkTag>> {
            unimplemented!()
        }
        async fn search_bookmarks(&self, _query: &str, _limit: usize) -> Result<Vec<Bookmark>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_url_index_normalizes_keys() {
        let client = PagedClient::two_pages();
        let cache = BookmarkCache::new();
        let index = cache.get_url_index(&client).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains_key("https://example.com/A"));
        assert!(index.contains_key("https://example.com/b"));
    }

    #[tokio::test]
    async fn test_scope_enables_reuse() {
        let client = PagedClient::two_pages();
        let cache = BookmarkCache::new();

        {
            let _scope = cache.scope();
            assert!(cache.reuse_enabled());
            let _ = cache.get_url_index(&client).await.unwrap();
            let calls_after_first = client.calls.load(Ordering::SeqCst);
            let _ = cache.get_url_index(&client).await.unwrap();
            assert_eq!(client.calls.load(Ordering::SeqCst), calls_after_first);
            // The index build also primed the bookmark list.
            assert!(cache.cached_bookmarks().is_some());
        }

        // Scope dropped: flag restored, caches no longer served.
        assert!(!cache.reuse_enabled());
        assert!(cache.cached_bookmarks().is_none());
    }

    #[tokio::test]
    async fn test_no_reuse_outside_scope() {
        let client = PagedClient::two_pages();
        let cache = BookmarkCache::new();
        let _ = cache.get_url_index(&client).await.unwrap();
        let first = client.calls.load(Ordering::SeqCst);
        let _ = cache.get_url_index(&client).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), first * 2);
    }

    #[tokio::test]
    async fn test_pager_yields_normalized_pairs() {
        let client = PagedClient::two_pages();
        let cache = BookmarkCache::new();
        let mut pager = cache.iter_bookmarks(&client);

        let (url_a, bookmark_a) = pager.next().await.unwrap().unwrap();
        assert_eq!(url_a, "https://example.com/A");
        assert_eq!(bookmark_a.id, "a");

        // The url-less bookmark is skipped.
        let (url_b, _) = pager.next().await.unwrap().unwrap();
        assert_eq!(url_b, "https://example.com/b");

        assert!(pager.next().await.unwrap().is_none());
    }
}
