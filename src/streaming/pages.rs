//! Fixed-size page planning over an ordered record list.

/// A contiguous half-open range `[start, end)` of record positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    /// Zero-based page index (`start / page_size`).
    pub number: usize,
    pub start: usize,
    /// Exclusive; the last page is clamped to the record count.
    pub end: usize,
}

impl PageBounds {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for PageBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {} [{}, {})", self.number, self.start, self.end)
    }
}

/// Splits `total` records into pages of `page_size`.
///
/// Every page but the last holds exactly `page_size` records. Returns no
/// pages for an empty input or a zero page size.
pub fn plan_pages(total: usize, page_size: usize) -> Vec<PageBounds> {
    if page_size == 0 {
        return Vec::new();
    }

    (0..total.div_ceil(page_size))
        .map(|number| {
            let start = number * page_size;
            PageBounds {
                number,
                start,
                end: (start + page_size).min(total),
            }
        })
        .collect()
}
