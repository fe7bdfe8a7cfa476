//! Page accumulation for infinite lists.
//!
//! A [`CursorState`] is the caller's view of one infinite-list session. The
//! accumulated pages are also committed to the store under the
//! `infiniteList` key, which every session over the same params shares.
//! Sessions catch up with pages another session already loaded; if the
//! entry is invalidated, or ends up holding a sequence that no longer
//! starts with the session's pages, the session starts over from the
//! first page.

use std::collections::HashSet;

use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::FetchError;
use crate::fetch::FetchExecutor;
use crate::record::{CachedData, PaginatedResult, Record};

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Opaque token handed out by the server.
    Token(String),
    /// Query pairs of a `next` link, sent merged over the list params.
    Link(Map<String, Value>),
    /// 1-based page number, derived from `totalCount` when no token is given.
    Page(u32),
}

impl Cursor {
    /// Interpret a server-provided `next` value. Absolute http(s) links
    /// yield their query pairs; a link without any is no cursor at all.
    fn from_server(next: String) -> Option<Self> {
        match Url::parse(&next) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let pairs: Map<String, Value> = url
                    .query_pairs()
                    .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
                    .collect();
                (!pairs.is_empty()).then_some(Self::Link(pairs))
            }
            _ => Some(Self::Token(next)),
        }
    }
}

/// What [`PaginationCursorManager::next_page`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Appended,
    /// The sequence was invalidated; it was cleared and the first page
    /// loaded again.
    Restarted,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    params: Value,
    pages: Vec<PaginatedResult>,
    next: Option<Cursor>,
    seen_tokens: HashSet<String>,
}

impl CursorState {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            pages: Vec::new(),
            next: None,
            seen_tokens: HashSet::new(),
        }
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn pages(&self) -> &[PaginatedResult] {
        &self.pages
    }

    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next.as_ref()
    }

    pub fn items(&self) -> impl Iterator<Item = &Record> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    /// `totalCount` from the most recent page.
    pub fn total_count(&self) -> Option<u64> {
        self.pages.last().map(|page| page.total_count)
    }

    pub fn is_initial(&self) -> bool {
        self.pages.is_empty()
    }

    /// Back to the empty state; the params are kept.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.next = None;
        self.seen_tokens.clear();
    }

    /// Replace the loaded pages with `pages`, replaying their cursors.
    fn adopt(&mut self, pages: Vec<PaginatedResult>) {
        self.reset();
        for page in pages {
            self.push(page);
        }
    }

    fn push(&mut self, page: PaginatedResult) {
        let empty = page.items.is_empty();
        let total = page.total_count;
        let token = page.next_cursor.clone();
        self.pages.push(page);

        if empty {
            self.next = None;
            return;
        }
        self.next = match token {
            Some(token) if !self.seen_tokens.insert(token.clone()) => {
                warn!(%token, "Server repeated a cursor; treating sequence as complete");
                None
            }
            Some(token) => Cursor::from_server(token).or_else(|| self.derived_page(total)),
            None => self.derived_page(total),
        };
    }

    fn derived_page(&self, total: u64) -> Option<Cursor> {
        if (self.item_count() as u64) < total {
            u32::try_from(self.pages.len() + 1).ok().map(Cursor::Page)
        } else {
            None
        }
    }
}

/// How the cached sequence relates to a session's pages.
enum Standing {
    Current,
    /// Another session loaded further; these pages start with ours.
    Behind(Vec<PaginatedResult>),
    Diverged,
}

fn standing(entry: &CacheEntry, pages: &[PaginatedResult]) -> Standing {
    if entry.is_invalidated() {
        return Standing::Diverged;
    }
    match entry.confirmed_data().and_then(CachedData::as_pages) {
        Some(cached) if cached == pages => Standing::Current,
        Some(cached) if cached.starts_with(pages) => Standing::Behind(cached.to_vec()),
        _ => Standing::Diverged,
    }
}

enum Step {
    Committed,
    Adopt(Vec<PaginatedResult>),
    Moved,
}

/// Drives page requests for one resource's infinite lists.
#[derive(Clone)]
pub struct PaginationCursorManager {
    store: CacheStore,
    executor: FetchExecutor,
}

impl PaginationCursorManager {
    pub fn new(store: CacheStore, executor: FetchExecutor) -> Self {
        Self { store, executor }
    }

    /// More pages may exist. A state that has loaded nothing always has more.
    pub fn has_more(&self, state: &CursorState) -> bool {
        state.is_initial() || state.next.is_some()
    }

    /// Fetch and append the page after the last one in `state`.
    ///
    /// Params that differ from the state's start a new sequence. Once the
    /// sequence has advanced, page 1 is only requested again after an
    /// invalidation, and then the earlier pages are thrown away first.
    /// Concurrent sessions asking for the same page share one request.
    #[instrument(
        skip_all,
        fields(resource = self.executor.keys().resource(), loaded = state.pages.len())
    )]
    pub async fn next_page(
        &self,
        params: &Value,
        state: &mut CursorState,
    ) -> Result<PageOutcome, FetchError> {
        if state.params != *params {
            debug!("Params changed; starting a new sequence");
            *state = CursorState::new(params.clone());
        }
        let key = self.executor.keys().infinite(params);

        let mut restarted = false;
        loop {
            if !state.is_initial() {
                let current = self.store.get(&key);
                match current.map_or(Standing::Diverged, |entry| standing(&entry, &state.pages)) {
                    Standing::Current => {}
                    Standing::Behind(pages) => {
                        debug!(%key, pages = pages.len(), "Caught up with pages loaded elsewhere");
                        state.adopt(pages);
                    }
                    Standing::Diverged => {
                        info!(%key, "Infinite list invalidated; restarting from the first page");
                        state.reset();
                        restarted = true;
                    }
                }
            }

            let Some(request) = self.request_for(state) else {
                return Ok(PageOutcome::Exhausted);
            };

            let generation = self.store.generation(&key);
            let executor = self.executor.clone();
            let page_key = key.clone();
            let page_request = request.clone();
            let page = self
                .store
                .fetch_page_deduplicated(key.clone(), &request, async move {
                    executor.fetch_page(page_key, &page_request).await
                })
                .await?;

            let was_initial = state.is_initial();
            let mut proposed = state.pages.clone();
            proposed.push(page);
            let step = self.store.update(&key, |entry| {
                if entry.generation != generation {
                    return Step::Moved;
                }
                match standing(entry, &proposed) {
                    Standing::Current => Step::Adopt(proposed.clone()),
                    Standing::Behind(pages) => Step::Adopt(pages),
                    Standing::Diverged
                        if was_initial
                            || matches!(standing(entry, &state.pages), Standing::Current) =>
                    {
                        entry.store_confirmed(CachedData::Pages(proposed.clone()));
                        Step::Committed
                    }
                    Standing::Diverged => Step::Moved,
                }
            });

            match step {
                Step::Moved => {
                    debug!(%key, "Discarding page fetched across an invalidation");
                    continue;
                }
                Step::Committed => state.adopt(proposed),
                Step::Adopt(pages) => state.adopt(pages),
            }
            debug!(
                %key,
                pages = state.pages.len(),
                items = state.item_count(),
                has_more = self.has_more(state),
                "Page appended"
            );
            return Ok(if restarted {
                PageOutcome::Restarted
            } else {
                PageOutcome::Appended
            });
        }
    }

    fn request_for(&self, state: &CursorState) -> Option<Value> {
        let config = self.store.config();
        match &state.next {
            None if state.is_initial() => Some(state.params.clone()),
            None => None,
            Some(Cursor::Token(token)) => {
                Some(with_param(&state.params, &config.cursor_param, json!(token)))
            }
            Some(Cursor::Link(pairs)) => Some(
                pairs
                    .iter()
                    .fold(state.params.clone(), |params, (name, value)| {
                        with_param(&params, name, value.clone())
                    }),
            ),
            Some(Cursor::Page(number)) => {
                Some(with_param(&state.params, &config.page_param, json!(number)))
            }
        }
    }
}

fn with_param(params: &Value, name: &str, value: Value) -> Value {
    let mut map = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            debug!(params = %other, "List params are not an object; sending cursor alone");
            Map::new()
        }
    };
    map.insert(name.to_string(), value);
    Value::Object(map)
}
