//! # Code Page Registry
//!
//! Maps `(page, token id)` to a tag name and back, one table per ActiveSync
//! namespace.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     ActiveSyncCodePages (static)                        │
//! │                                                                         │
//! │  page 0x00 "AirSync"      [0x05 Sync, 0x06 Responses, 0x07 Add, ...]    │
//! │  page 0x01 "Contacts"     [0x05 Anniversary, ...]                       │
//! │  ...                                                                    │
//! │  page 0x19 "Find"                                                       │
//! │  page 0xFE "WindowsLive"                                                │
//! │                                                                         │
//! │  decoder: name_for_token(page, id)    encoder: token_for_name(page, tag)│
//! │           namespace(page)                      page_for_namespace(ns)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tables are built once on first use and never mutated. Codecs take any
//! [`CodePageRegistry`], so a deployment can extend the vocabulary without
//! touching codec logic.

mod tables;

pub use tables::ns;

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Token ids occupy the low six bits of a tag byte.
pub const TOKENS_PER_PAGE: usize = 64;

/// Read-only lookup interface consumed by the WBXML decoder and encoder.
pub trait CodePageRegistry: Send + Sync {
    /// Tag name for a token id on a page, if the page defines it.
    fn name_for_token(&self, page: u8, token: u8) -> Option<&str>;

    /// Token id for a tag name on a page, if the page defines it.
    fn token_for_name(&self, page: u8, name: &str) -> Option<u8>;

    /// Namespace served by a page.
    fn namespace(&self, page: u8) -> Option<&str>;

    /// Page serving a namespace.
    fn page_for_namespace(&self, namespace: &str) -> Option<u8>;

    /// True if the page number is registered.
    fn contains_page(&self, page: u8) -> bool {
        self.namespace(page).is_some()
    }
}

/// One namespace's token table.
#[derive(Debug)]
pub struct CodePage {
    number: u8,
    namespace: &'static str,
    names: [Option<&'static str>; TOKENS_PER_PAGE],
    tokens: HashMap<&'static str, u8>,
}

impl CodePage {
    /// Builds a page from `(token, name)` pairs. Tokens above 0x3F are ignored.
    pub fn new(number: u8, namespace: &'static str, entries: &[(u8, &'static str)]) -> Self {
        let mut names = [None; TOKENS_PER_PAGE];
        let mut tokens = HashMap::with_capacity(entries.len());
        for &(token, name) in entries {
            if (token as usize) < TOKENS_PER_PAGE {
                names[token as usize] = Some(name);
                tokens.insert(name, token);
            }
        }
        Self {
            number,
            namespace,
            names,
            tokens,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn name(&self, token: u8) -> Option<&'static str> {
        self.names.get(token as usize).copied().flatten()
    }

    pub fn token(&self, name: &str) -> Option<u8> {
        self.tokens.get(name).copied()
    }

    /// Number of tags defined on this page.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The standard ActiveSync vocabulary (pages 0-25 plus 0xFE).
#[derive(Debug)]
pub struct ActiveSyncCodePages {
    pages: HashMap<u8, CodePage>,
    by_namespace: HashMap<&'static str, u8>,
}

static ACTIVE_SYNC: Lazy<ActiveSyncCodePages> = Lazy::new(ActiveSyncCodePages::build);

impl ActiveSyncCodePages {
    /// Process-wide instance.
    pub fn global() -> &'static ActiveSyncCodePages {
        &ACTIVE_SYNC
    }

    fn build() -> Self {
        let mut pages = HashMap::with_capacity(tables::PAGES.len());
        let mut by_namespace = HashMap::with_capacity(tables::PAGES.len());
        for &(number, namespace, entries) in tables::PAGES {
            pages.insert(number, CodePage::new(number, namespace, entries));
            by_namespace.insert(namespace, number);
        }
        Self {
            pages,
            by_namespace,
        }
    }

    pub fn page(&self, number: u8) -> Option<&CodePage> {
        self.pages.get(&number)
    }

    /// All pages, in ascending page-number order.
    pub fn pages(&self) -> Vec<&CodePage> {
        let mut pages: Vec<&CodePage> = self.pages.values().collect();
        pages.sort_by_key(|p| p.number());
        pages
    }
}

impl CodePageRegistry for ActiveSyncCodePages {
    fn name_for_token(&self, page: u8, token: u8) -> Option<&str> {
        self.pages.get(&page).and_then(|p| p.name(token))
    }

    fn token_for_name(&self, page: u8, name: &str) -> Option<u8> {
        self.pages.get(&page).and_then(|p| p.token(name))
    }

    fn namespace(&self, page: u8) -> Option<&str> {
        self.pages.get(&page).map(|p| p.namespace())
    }

    fn page_for_namespace(&self, namespace: &str) -> Option<u8> {
        self.by_namespace.get(namespace).copied()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_all_pages() {
        let registry = ActiveSyncCodePages::global();
        for page in 0x00..=0x19 {
            assert!(registry.contains_page(page), "page {page} missing");
        }
        assert!(registry.contains_page(0xFE));
        assert!(!registry.contains_page(0x1A));
        assert!(!registry.contains_page(0xFF));
    }

    #[test]
    fn test_lookups_are_inverse() {
        let registry = ActiveSyncCodePages::global();
        for page in registry.pages() {
            for token in 0..TOKENS_PER_PAGE as u8 {
                if let Some(name) = page.name(token) {
                    assert_eq!(
                        registry.token_for_name(page.number(), name),
                        Some(token),
                        "{}:{name}",
                        page.namespace()
                    );
                }
            }
        }
    }

    #[test]
    fn test_well_known_tokens() {
        let registry = ActiveSyncCodePages::global();
        assert_eq!(registry.name_for_token(0x00, 0x05), Some("Sync"));
        assert_eq!(registry.name_for_token(0x00, 0x0B), Some("SyncKey"));
        assert_eq!(registry.token_for_name(0x07, "FolderSync"), Some(0x16));
        assert_eq!(registry.token_for_name(0x01, "FileAs"), Some(0x1E));
        assert_eq!(registry.namespace(0x04), Some(ns::CALENDAR));
        assert_eq!(registry.page_for_namespace(ns::AIR_SYNC_BASE), Some(0x11));
        assert_eq!(registry.page_for_namespace(ns::WINDOWS_LIVE), Some(0xFE));
    }

    #[test]
    fn test_absent_tags() {
        let registry = ActiveSyncCodePages::global();
        assert_eq!(registry.name_for_token(0x00, 0x3F), None);
        assert_eq!(registry.token_for_name(0x00, "FileAs"), None);
        assert_eq!(registry.page_for_namespace("Nope"), None);
    }
}
