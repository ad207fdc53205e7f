/// Inclusive row range of one page, as sent to the backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct PageRange {
    pub from: u64,
    pub to: u64,
}

/// One page of rows plus the exact row count at query time.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
}

impl PageRange {
    #[must_use]
    pub fn for_page(page: u64, page_size: u64) -> Self {
        let from = page * page_size;
        Self {
            from,
            to: from + page_size.max(1) - 1,
        }
    }

    /// The same range moved by `rows`, e.g. after rows before it went away.
    #[must_use]
    pub fn shifted(self, rows: i64) -> Self {
        let from = self.from.saturating_add_signed(rows);
        Self {
            from,
            to: from + self.size() - 1,
        }
    }

    /// Number of rows the range spans.
    #[must_use]
    pub fn size(self) -> u64 {
        self.to - self.from + 1
    }

    /// Whether rows remain past this range, given the total count.
    #[must_use]
    pub fn has_more(self, total: u64) -> bool {
        self.to + 1 < total
    }
}

#[cfg(test)]
mod tests {
    use crate::model::page::PageRange;

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(PageRange::for_page(0, 5), PageRange { from: 0, to: 4 });
        assert_eq!(PageRange::for_page(2, 5), PageRange { from: 10, to: 14 });
        assert_eq!(PageRange::for_page(2, 5).size(), 5);
    }

    #[test]
    fn has_more_against_total() {
        assert!(PageRange::for_page(0, 5).has_more(12));
        assert!(PageRange::for_page(1, 5).has_more(12));
        assert!(!PageRange::for_page(2, 5).has_more(12));
        assert!(!PageRange::for_page(1, 5).has_more(10));
        assert!(!PageRange::for_page(0, 5).has_more(0));
    }

    #[test]
    fn shifted_keeps_size() {
        assert_eq!(PageRange::for_page(1, 5).shifted(-1), PageRange { from: 4, to: 8 });
        assert_eq!(PageRange::for_page(1, 5).shifted(2), PageRange { from: 7, to: 11 });
        assert_eq!(PageRange::for_page(0, 5).shifted(-3), PageRange { from: 0, to: 4 });
        assert!(PageRange::for_page(1, 5).shifted(-1).has_more(11));
        assert!(!PageRange::for_page(2, 5).shifted(-1).has_more(11));
    }
}
