use serde::{Deserialize, Serialize};

use super::JobStatus;

/// Sortable columns for administrative listings.
///
/// An explicit allow-list: arbitrary column names are rejected at the type
/// level, so listing callers can never smuggle SQL through an order-by
/// clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Id,
    Queue,
    Status,
    Attempts,
    #[default]
    CreatedAt,
    UpdatedAt,
    ProcessedAt,
    AvailableAt,
}

impl SortKey {
    /// Parse a column name, returning `None` for anything outside the
    /// allow-list
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "queue" => Some(Self::Queue),
            "status" => Some(Self::Status),
            "attempts" => Some(Self::Attempts),
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            "processed_at" => Some(Self::ProcessedAt),
            "available_at" => Some(Self::AvailableAt),
            _ => None,
        }
    }

    /// Column name for this sort key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Queue => "queue",
            Self::Status => "status",
            Self::Attempts => "attempts",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::ProcessedAt => "processed_at",
            Self::AvailableAt => "available_at",
        }
    }
}

/// Sort direction for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Parse a direction, defaulting to descending for anything but "asc"
    pub fn parse(dir: &str) -> Self {
        if dir.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    /// SQL keyword for this direction
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filtered, paginated listing request for administrative queries
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Page size
    pub limit: u32,

    /// Rows to skip
    pub offset: u32,

    /// Restrict to one queue
    pub queue: Option<String>,

    /// Restrict to one status
    pub status: Option<JobStatus>,

    /// Substring match against queue name or error text
    pub search: Option<String>,

    /// Sort column (allow-listed)
    pub sort: SortKey,

    /// Sort direction
    pub order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 25,
            offset: 0,
            queue: None,
            status: None,
            search: None,
            sort: SortKey::default(),
            order: SortOrder::default(),
        }
    }
}

impl ListQuery {
    /// Create a listing request with default pagination
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the row offset
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Filter by queue name
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Filter by status
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by substring match on queue name or error text
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Set the sort column
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Set the sort direction
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// One page of listing results plus pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Rows for this page
    pub items: Vec<T>,

    /// Total rows matching the filters (across all pages)
    pub total: u64,

    /// Page size the query asked for
    pub limit: u32,

    /// Row offset the query asked for
    pub offset: u32,
}

impl<T> Page<T> {
    /// Number of pages at the requested page size
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.total.div_ceil(self.limit as u64)
        }
    }
}

/// Per-status counts plus the number of distinct queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub working: u64,
    pub done: u64,
    pub failed: u64,
    pub queues: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_allow_list_rejects_arbitrary_columns() {
        assert_eq!(SortKey::parse("created_at"), Some(SortKey::CreatedAt));
        assert_eq!(SortKey::parse("payload"), None);
        assert_eq!(SortKey::parse("id; DROP TABLE queues"), None);
    }

    #[test]
    fn sort_order_defaults_to_desc() {
        assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("ASC"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("desc"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Desc);
    }

    #[test]
    fn page_math() {
        let page: Page<u8> = Page {
            items: vec![],
            total: 51,
            limit: 25,
            offset: 0,
        };
        assert_eq!(page.total_pages(), 3);

        let zero_limit: Page<u8> = Page {
            items: vec![],
            total: 51,
            limit: 0,
            offset: 0,
        };
        assert_eq!(zero_limit.total_pages(), 1);
    }
}
