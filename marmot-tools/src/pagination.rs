//! Pagination scratch store for oversized tool results.
//!
//! The full string is kept under an opaque `result_id`; the model reads
//! further pages through the auto-registered `read_more` tool. Pages are
//! character-slice windows, 1-indexed. The footer format is part of the
//! tool ABI: the model sees it verbatim.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// Failure modes when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    NotFound,
    OutOfRange,
}

struct PaginationEntry {
    full: String,
    page_chars: usize,
    #[allow(dead_code)]
    created_at: SystemTime,
}

/// Per-registry scratch table of paginated results.
///
/// Entries live for the registry's lifetime; `clear` drops them all.
#[derive(Default)]
pub struct PaginationStore {
    entries: Mutex<HashMap<String, PaginationEntry>>,
}

impl PaginationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a full result and return its opaque id.
    pub fn insert(&self, full: String, page_chars: usize) -> String {
        let result_id = uuid::Uuid::new_v4().simple().to_string();
        self.entries.lock().unwrap().insert(
            result_id.clone(),
            PaginationEntry {
                full,
                page_chars,
                created_at: SystemTime::now(),
            },
        );
        result_id
    }

    /// Render one page (1-indexed) with its footer.
    pub fn page(&self, result_id: &str, page: usize) -> Result<String, PageError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(result_id).ok_or(PageError::NotFound)?;

        let total_chars = entry.full.chars().count();
        let total_pages = total_chars.div_ceil(entry.page_chars).max(1);
        if page == 0 || page > total_pages {
            return Err(PageError::OutOfRange);
        }

        let start = (page - 1) * entry.page_chars;
        let slice: String = entry
            .full
            .chars()
            .skip(start)
            .take(entry.page_chars)
            .collect();

        Ok(render_page(&slice, result_id, page, total_pages))
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append the footer to a page slice. The last page carries only the bare
/// page marker; there is no further page to call for.
fn render_page(slice: &str, result_id: &str, page: usize, total_pages: usize) -> String {
    if page < total_pages {
        format!(
            "{slice}\n\n[Page {page}/{total_pages}] — call read_more(result_id={result_id}, \
             page={next}) for more",
            next = page + 1
        )
    } else {
        format!("{slice}\n\n[Page {page}/{total_pages}]")
    }
}

/// Strip the pagination footer from a page, if present.
///
/// Test helper for round-trip checks; the footer starts at the final
/// `\n\n[Page ` marker.
pub fn strip_footer(page: &str) -> &str {
    match page.rfind("\n\n[Page ") {
        Some(pos) => &page[..pos],
        None => page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_slicing_and_footer() {
        let store = PaginationStore::new();
        let full = "abcdefghijklmnopqrstuvwxyz0123456789".to_string(); // 36 chars
        let id = store.insert(full, 10);

        let page1 = store.page(&id, 1).unwrap();
        assert!(page1.starts_with("abcdefghij"));
        assert!(page1.contains("[Page 1/4]"));
        assert!(page1.contains(&format!("read_more(result_id={id}, page=2)")));

        let page4 = store.page(&id, 4).unwrap();
        assert!(page4.starts_with("456789"));
        assert!(page4.ends_with("[Page 4/4]"));
        assert!(!page4.contains("read_more"));
    }

    #[test]
    fn test_round_trip_reassembly() {
        let store = PaginationStore::new();
        let full: String = (0..95).map(|i| ((i % 26) as u8 + b'a') as char).collect();
        let id = store.insert(full.clone(), 10);

        let total_pages = full.chars().count().div_ceil(10);
        let mut reassembled = String::new();
        for page in 1..=total_pages {
            reassembled.push_str(strip_footer(&store.page(&id, page).unwrap()));
        }
        assert_eq!(reassembled, full);
    }

    #[test]
    fn test_multibyte_text_never_splits_scalars() {
        let store = PaginationStore::new();
        let full = "日本語のテキストです。".repeat(5);
        let id = store.insert(full.clone(), 7);

        let total_pages = full.chars().count().div_ceil(7);
        let mut reassembled = String::new();
        for page in 1..=total_pages {
            reassembled.push_str(strip_footer(&store.page(&id, page).unwrap()));
        }
        assert_eq!(reassembled, full);
    }

    #[test]
    fn test_out_of_range_and_unknown() {
        let store = PaginationStore::new();
        let id = store.insert("short".to_string(), 10);

        assert_eq!(store.page(&id, 0), Err(PageError::OutOfRange));
        assert_eq!(store.page(&id, 2), Err(PageError::OutOfRange));
        assert_eq!(store.page("nope", 1), Err(PageError::NotFound));
    }

    #[test]
    fn test_clear_empties_store() {
        let store = PaginationStore::new();
        let id = store.insert("x".repeat(100), 10);
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.page(&id, 1), Err(PageError::NotFound));
    }
}
