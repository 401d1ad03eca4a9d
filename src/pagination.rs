/// Posts per page requested from the server.
pub const PAGE_SIZE: u32 = 5;

/// `ceil(count / page_size)`, never less than one page.
pub fn total_pages(count: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = count.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Current page index and page count. `1 <= page_index <= total_pages`
/// holds after every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page_index: u32,
    total_pages: u32,
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page_index: 1,
            total_pages: 1,
        }
    }
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn has_next(&self) -> bool {
        self.page_index < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page_index > 1
    }

    /// Advances one page. Returns the page to load, or `None` on the last page.
    pub fn next(&mut self) -> Option<u32> {
        if !self.has_next() {
            return None;
        }
        self.page_index += 1;
        Some(self.page_index)
    }

    pub fn previous(&mut self) -> Option<u32> {
        if !self.has_previous() {
            return None;
        }
        self.page_index -= 1;
        Some(self.page_index)
    }

    /// Jumps to `page`, clamped into range. Returns the page to load.
    pub fn go_to(&mut self, page: u32) -> u32 {
        self.page_index = page.clamp(1, self.total_pages);
        self.page_index
    }

    /// Adopts a fresh server count. Returns true when the current index had
    /// to move because the feed shrank.
    pub fn set_count(&mut self, count: u64) -> bool {
        self.total_pages = total_pages(count, PAGE_SIZE);
        if self.page_index > self.total_pages {
            self.page_index = self.total_pages;
            return true;
        }
        false
    }
}
