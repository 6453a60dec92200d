//! Content injection registry.
//!
//! Plugins contribute presentation fragments (CSS, HTML, JS) to named slots
//! such as `head` or `body`. An external renderer reads them back per
//! `(slot, kind)` in arrival order. Fragments are never removed while the
//! contributing plugin stays active.

use kaos_runtime::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Kind of a content fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Css,
    Html,
    Js,
}

impl ContentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "css" => Some(ContentKind::Css),
            "html" => Some(ContentKind::Html),
            "js" => Some(ContentKind::Js),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Css => "css",
            ContentKind::Html => "html",
            ContentKind::Js => "js",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contributed fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentFragment {
    pub owner: String,
    pub slot: String,
    pub kind: ContentKind,
    pub content: String,
    /// Global arrival sequence number.
    pub sequence: u64,
}

#[derive(Default)]
struct Fragments {
    next_sequence: u64,
    by_slot: HashMap<(String, ContentKind), Vec<ContentFragment>>,
}

/// Namespaced multi-map from `(slot, kind)` to ordered fragments.
#[derive(Default)]
pub struct ContentRegistry {
    inner: RwLock<Fragments>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment while `active` is set. Returns its sequence number.
    ///
    /// The flag is checked under the write lock. Plugins reach this through
    /// [`ScopedContent`](crate::ScopedContent) only.
    pub(crate) async fn add_fragment(
        &self,
        owner: &str,
        slot: &str,
        kind: ContentKind,
        content: impl Into<String>,
        active: &AtomicBool,
    ) -> Result<u64, RegistryError> {
        let mut inner = self.inner.write().await;
        if !active.load(Ordering::Acquire) {
            return Err(RegistryError::OwnerInactive(owner.to_string()));
        }
        Ok(Self::push(&mut inner, owner, slot, kind, content.into()))
    }

    fn push(
        inner: &mut Fragments,
        owner: &str,
        slot: &str,
        kind: ContentKind,
        content: String,
    ) -> u64 {
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner
            .by_slot
            .entry((slot.to_string(), kind))
            .or_default()
            .push(ContentFragment {
                owner: owner.to_string(),
                slot: slot.to_string(),
                kind,
                content,
                sequence,
            });
        debug!("Content fragment added: {} {} -> {}", owner, kind, slot);
        sequence
    }

    /// Fragments for a slot and kind, in arrival order.
    pub async fn list_fragments(&self, slot: &str, kind: ContentKind) -> Vec<ContentFragment> {
        let inner = self.inner.read().await;
        inner
            .by_slot
            .get(&(slot.to_string(), kind))
            .cloned()
            .unwrap_or_default()
    }

    /// Contents for a slot and kind joined with newlines, ready for a page.
    pub async fn render(&self, slot: &str, kind: ContentKind) -> String {
        self.list_fragments(slot, kind)
            .await
            .into_iter()
            .map(|f| f.content)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every fragment from one owner, in arrival order.
    pub async fn fragments_by_owner(&self, owner: &str) -> Vec<ContentFragment> {
        let inner = self.inner.read().await;
        let mut fragments: Vec<ContentFragment> = inner
            .by_slot
            .values()
            .flatten()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect();
        fragments.sort_by_key(|f| f.sequence);
        fragments
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_slot.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub(crate) async fn remove_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for fragments in inner.by_slot.values_mut() {
            let before = fragments.len();
            fragments.retain(|f| f.owner != owner);
            removed += before - fragments.len();
        }
        inner.by_slot.retain(|_, fragments| !fragments.is_empty());
        removed
    }

    pub(crate) async fn clear(&self) {
        self.inner.write().await.by_slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static LIVE: AtomicBool = AtomicBool::new(true);

    async fn add(to: &ContentRegistry, owner: &str, slot: &str, kind: ContentKind, text: &str) {
        to.add_fragment(owner, slot, kind, text, &LIVE).await.unwrap();
    }

    #[tokio::test]
    async fn test_fragments_keep_arrival_order() {
        let registry = ContentRegistry::new();
        add(&registry, "A", "head", ContentKind::Css, "a{}").await;
        add(&registry, "B", "head", ContentKind::Css, "b{}").await;
        add(&registry, "A", "head", ContentKind::Css, "c{}").await;

        let contents: Vec<String> = registry
            .list_fragments("head", ContentKind::Css)
            .await
            .into_iter()
            .map(|f| f.content)
            .collect();
        assert_eq!(contents, ["a{}", "b{}", "c{}"]);
    }

    #[tokio::test]
    async fn test_slot_and_kind_are_separate() {
        let registry = ContentRegistry::new();
        add(&registry, "A", "head", ContentKind::Css, "x").await;
        add(&registry, "A", "body", ContentKind::Css, "y").await;
        add(&registry, "A", "head", ContentKind::Js, "z").await;

        assert_eq!(registry.list_fragments("head", ContentKind::Css).await.len(), 1);
        assert_eq!(registry.list_fragments("body", ContentKind::Html).await.len(), 0);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_listing_is_stable() {
        let registry = ContentRegistry::new();
        add(&registry, "A", "body", ContentKind::Html, "<p>1</p>").await;
        let first = registry.list_fragments("body", ContentKind::Html).await;
        let second = registry.list_fragments("body", ContentKind::Html).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_render_joins_with_newlines() {
        let registry = ContentRegistry::new();
        add(&registry, "A", "body", ContentKind::Js, "one();").await;
        add(&registry, "B", "body", ContentKind::Js, "two();").await;
        assert_eq!(registry.render("body", ContentKind::Js).await, "one();\ntwo();");
    }

    #[tokio::test]
    async fn test_remove_owner_only_touches_owner() {
        let registry = ContentRegistry::new();
        add(&registry, "A", "head", ContentKind::Css, "a").await;
        add(&registry, "B", "head", ContentKind::Css, "b").await;

        assert_eq!(registry.remove_owner("A").await, 1);
        let left = registry.fragments_by_owner("B").await;
        assert_eq!(left.len(), 1);
        assert!(registry.fragments_by_owner("A").await.is_empty());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ContentKind::parse("css"), Some(ContentKind::Css));
        assert_eq!(ContentKind::parse("CSS"), None);
        assert_eq!(ContentKind::Js.to_string(), "js");
    }
}
