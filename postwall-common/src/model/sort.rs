use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Order of the post feed. All orders are descending.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Popular,
    Comments,
    Views,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown sort order: {0:?}")]
pub struct UnknownSortOrderError(String);

impl SortOrder {
    pub const ALL: [SortOrder; 4] = [
        SortOrder::Newest,
        SortOrder::Popular,
        SortOrder::Comments,
        SortOrder::Views,
    ];

    /// The column the backend orders by.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            SortOrder::Newest => "created_at",
            SortOrder::Popular => "likes",
            SortOrder::Comments => "comment_count",
            SortOrder::Views => "views",
        }
    }

    /// Only the newest-first feed can take live changes without breaking its order.
    #[must_use]
    pub fn accepts_live_changes(self) -> bool {
        self == SortOrder::Newest
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Popular => "popular",
            SortOrder::Comments => "comments",
            SortOrder::Views => "views",
        }
    }
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = UnknownSortOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortOrder::ALL
            .into_iter()
            .find(|order| order.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSortOrderError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::sort::SortOrder;

    #[test]
    fn parse_round_trip() {
        for order in SortOrder::ALL {
            assert_eq!(order.to_string().parse::<SortOrder>(), Ok(order));
        }
        assert!("oldest".parse::<SortOrder>().is_err());
    }

    #[test]
    fn only_newest_takes_live_changes() {
        assert!(SortOrder::Newest.accepts_live_changes());
        assert!(!SortOrder::Popular.accepts_live_changes());
        assert!(!SortOrder::Comments.accepts_live_changes());
        assert!(!SortOrder::Views.accepts_live_changes());
    }
}
