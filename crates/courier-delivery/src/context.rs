//! Ports to the host environment: page lookups and side effects.
//!
//! Everything behind these traits is best-effort. The dispatcher turns any
//! `Err` from a [`PageContext`] into an empty value and ignores
//! [`SideEffects`] failures, so an implementation may fail freely without
//! affecting delivery.

use std::{collections::HashMap, future::Future, pin::Pin};

use courier_core::TabId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Failure of a host lookup or side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ContextError(pub String);

impl ContextError {
    /// Creates an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Boxed future returned by the port traits.
pub type ContextFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, ContextError>> + Send + 'a>>;

/// A page handle known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    /// Tab identifier.
    pub id: TabId,
    /// Current URL.
    pub url: String,
    /// Page title.
    pub title: String,
}

/// Open Graph fields extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    /// `og:title`.
    pub og_title: String,
    /// `og:type`.
    pub og_type: String,
    /// `article:published_time` or the JSON-LD `datePublished`.
    pub published_time: String,
}

/// Read access to open pages.
pub trait PageContext: Send + Sync + 'static {
    /// The focused tab, if any.
    fn active_tab(&self) -> ContextFuture<'_, Option<TabInfo>>;

    /// Looks up a tab by id.
    fn tab(&self, id: TabId) -> ContextFuture<'_, TabInfo>;

    /// Currently selected text.
    fn selection_text(&self, id: TabId) -> ContextFuture<'_, String>;

    /// Open Graph metadata.
    fn page_metadata(&self, id: TabId) -> ContextFuture<'_, PageMetadata>;

    /// `<link rel="canonical">` or `og:url`, whichever the page declares.
    fn canonical_link(&self, id: TabId) -> ContextFuture<'_, Option<String>>;
}

/// Fire-and-forget effects triggered by a dispatch.
pub trait SideEffects: Send + Sync + 'static {
    /// Copies `text` to the system clipboard.
    fn copy_to_clipboard(&self, text: &str) -> ContextFuture<'_, ()>;

    /// Shows a user notification.
    fn notify(&self, title: &str, message: &str);
}

/// Everything a page exposes, for [`StaticPageContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    /// URL.
    pub url: String,
    /// Title.
    pub title: String,
    /// Selected text.
    pub selection: String,
    /// Open Graph metadata.
    pub metadata: PageMetadata,
    /// Declared canonical link.
    pub canonical: Option<String>,
}

/// Page context backed by a fixed set of pages.
///
/// Used by the CLI, where page details arrive as arguments, and by tests.
/// Lookups of unknown tabs fail.
#[derive(Debug, Clone, Default)]
pub struct StaticPageContext {
    pages: HashMap<TabId, PageSnapshot>,
    active: Option<TabId>,
}

impl StaticPageContext {
    /// A context with no pages at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a page under `id`.
    #[must_use]
    pub fn with_page(mut self, id: TabId, page: PageSnapshot) -> Self {
        self.pages.insert(id, page);
        self
    }

    /// Adds a page and marks it active.
    #[must_use]
    pub fn with_active_page(mut self, id: TabId, page: PageSnapshot) -> Self {
        self.pages.insert(id, page);
        self.active = Some(id);
        self
    }

    fn page(&self, id: TabId) -> std::result::Result<&PageSnapshot, ContextError> {
        self.pages.get(&id).ok_or_else(|| ContextError::new(format!("no tab with id {id}")))
    }
}

impl PageContext for StaticPageContext {
    fn active_tab(&self) -> ContextFuture<'_, Option<TabInfo>> {
        let tab = self.active.and_then(|id| {
            self.pages.get(&id).map(|page| TabInfo {
                id,
                url: page.url.clone(),
                title: page.title.clone(),
            })
        });
        Box::pin(async move { Ok(tab) })
    }

    fn tab(&self, id: TabId) -> ContextFuture<'_, TabInfo> {
        let result =
            self.page(id).map(|page| TabInfo { id, url: page.url.clone(), title: page.title.clone() });
        Box::pin(async move { result })
    }

    fn selection_text(&self, id: TabId) -> ContextFuture<'_, String> {
        let result = self.page(id).map(|page| page.selection.clone());
        Box::pin(async move { result })
    }

    fn page_metadata(&self, id: TabId) -> ContextFuture<'_, PageMetadata> {
        let result = self.page(id).map(|page| page.metadata.clone());
        Box::pin(async move { result })
    }

    fn canonical_link(&self, id: TabId) -> ContextFuture<'_, Option<String>> {
        let result = self.page(id).map(|page| page.canonical.clone());
        Box::pin(async move { result })
    }
}

/// Side effects that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSideEffects;

impl SideEffects for NoopSideEffects {
    fn copy_to_clipboard(&self, _text: &str) -> ContextFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn notify(&self, _title: &str, _message: &str) {}
}

/// Side effects for headless hosts: notifications become log events and
/// clipboard access is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSideEffects;

impl SideEffects for LogSideEffects {
    fn copy_to_clipboard(&self, _text: &str) -> ContextFuture<'_, ()> {
        Box::pin(async { Err(ContextError::new("clipboard not available")) })
    }

    fn notify(&self, title: &str, message: &str) {
        info!(title, message, "notification");
    }
}
