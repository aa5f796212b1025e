//! Append-only paged vector.
//!
//! Writers reserve a slot in the current page with one `fetch_add` on the page
//! cursor and publish the value into that slot. When a page fills up, the
//! writer that notices takes the page-list write lock and appends a fresh page
//! (unless another writer already did). Pages are never moved, so readers see
//! a stable prefix of every page.
//!
//! Values are read back only after writers are done (slices are probed once
//! finalized); slots reserved but not yet published are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// Default number of slots per page.
pub const DEFAULT_PAGE_CAPACITY: usize = 1024;

struct Page<T> {
    slots: Box<[OnceLock<T>]>,
    cursor: AtomicUsize,
}

impl<T> Page<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    fn is_full(&self) -> bool {
        self.cursor.load(Ordering::Acquire) >= self.slots.len()
    }

    fn published(&self) -> impl Iterator<Item = &T> + '_ {
        let reserved = self.cursor.load(Ordering::Acquire).min(self.slots.len());
        self.slots[..reserved].iter().filter_map(OnceLock::get)
    }
}

/// Concurrent append-only vector made of fixed-capacity pages.
pub struct PagedVec<T> {
    pages: RwLock<Vec<Arc<Page<T>>>>,
    page_capacity: usize,
    len: AtomicUsize,
}

impl<T> PagedVec<T> {
    /// Creates an empty vector with [`DEFAULT_PAGE_CAPACITY`] slots per page.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_capacity(DEFAULT_PAGE_CAPACITY)
    }

    /// Creates an empty vector with `page_capacity` slots per page.
    #[must_use]
    pub fn with_page_capacity(page_capacity: usize) -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
            page_capacity: page_capacity.max(1),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends a value.
    pub fn push(&self, value: T) {
        loop {
            let current = self.pages.read().last().cloned();
            if let Some(page) = current {
                let slot = page.cursor.fetch_add(1, Ordering::AcqRel);
                if slot < page.slots.len() {
                    // Each slot index is handed out exactly once
                    let _ = page.slots[slot].set(value);
                    self.len.fetch_add(1, Ordering::Release);
                    return;
                }
            }

            let mut pages = self.pages.write();
            if pages.last().map_or(true, |page| page.is_full()) {
                pages.push(Arc::new(Page::new(self.page_capacity)));
            }
        }
    }

    /// Returns the number of published values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns `true` if no value was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of allocated pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Calls `f` for every published value, in page order.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let pages: Vec<Arc<Page<T>>> = self.pages.read().clone();
        for page in &pages {
            page.published().for_each(&mut f);
        }
    }
}

impl<T: Clone> PagedVec<T> {
    /// Copies the published values into a `Vec`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len());
        self.for_each(|value| values.push(value.clone()));
        values
    }
}

impl<T> Default for PagedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PagedVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedVec")
            .field("len", &self.len())
            .field("pages", &self.page_count())
            .field("page_capacity", &self.page_capacity)
            .finish()
    }
}
