//! Find options, flags and results

use bson::Document as BsonDocument;
use std::time::Duration;

/// Server-side execution cap applied to materialised `find` calls
pub const FIND_MAX_TIME: Duration = Duration::from_millis(90_000);

/// Options passed through to the driver for find and count operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    sort: Option<BsonDocument>,
    skip: Option<u64>,
    limit: Option<i64>,
    projection: Option<BsonDocument>,
    max_time: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sort order
    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the fields to return
    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the server-side execution time limit
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn get_sort(&self) -> Option<&BsonDocument> {
        self.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn get_projection(&self) -> Option<&BsonDocument> {
        self.projection.as_ref()
    }

    pub fn get_max_time(&self) -> Option<Duration> {
        self.max_time
    }
}

/// Mode selectors for `find`
///
/// `count` takes precedence over `cursor`; with neither set the matching
/// documents are materialised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindFlags {
    pub count: bool,
    pub cursor: bool,
}

impl FindFlags {
    /// Count matching documents
    pub fn count() -> Self {
        Self {
            count: true,
            cursor: false,
        }
    }

    /// Return the raw driver cursor
    pub fn cursor() -> Self {
        Self {
            count: false,
            cursor: true,
        }
    }

    pub fn mode(&self) -> FindMode {
        if self.count {
            FindMode::Count
        } else if self.cursor {
            FindMode::Cursor
        } else {
            FindMode::Documents
        }
    }
}

/// The single mode a `find` call runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    Count,
    Cursor,
    Documents,
}

/// Result of a `find` call, one variant per mode
#[derive(Debug)]
pub enum FindOutput<C> {
    Count(u64),
    Cursor(C),
    Documents(Vec<BsonDocument>),
}

impl<C> FindOutput<C> {
    pub fn into_count(self) -> Option<u64> {
        match self {
            FindOutput::Count(count) => Some(count),
            _ => None,
        }
    }

    pub fn into_cursor(self) -> Option<C> {
        match self {
            FindOutput::Cursor(cursor) => Some(cursor),
            _ => None,
        }
    }

    pub fn into_documents(self) -> Option<Vec<BsonDocument>> {
        match self {
            FindOutput::Documents(documents) => Some(documents),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_query_options_new() {
        let options = QueryOptions::new();
        assert!(options.get_sort().is_none());
        assert!(options.get_skip().is_none());
        assert!(options.get_limit().is_none());
        assert!(options.get_projection().is_none());
        assert!(options.get_max_time().is_none());
    }

    #[test]
    fn test_query_options_chaining() {
        let sort = doc! { "name": 1 };
        let projection = doc! { "name": 1, "_id": 0 };

        let options = QueryOptions::new()
            .sort(sort.clone())
            .skip(5)
            .limit(10)
            .projection(projection.clone())
            .max_time(Duration::from_secs(1));

        assert_eq!(options.get_sort(), Some(&sort));
        assert_eq!(options.get_skip(), Some(5));
        assert_eq!(options.get_limit(), Some(10));
        assert_eq!(options.get_projection(), Some(&projection));
        assert_eq!(options.get_max_time(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_find_flags_mode() {
        assert_eq!(FindFlags::default().mode(), FindMode::Documents);
        assert_eq!(FindFlags::count().mode(), FindMode::Count);
        assert_eq!(FindFlags::cursor().mode(), FindMode::Cursor);
    }

    #[test]
    fn test_count_wins_over_cursor() {
        let flags = FindFlags {
            count: true,
            cursor: true,
        };
        assert_eq!(flags.mode(), FindMode::Count);
    }

    #[test]
    fn test_find_output_accessors() {
        let output: FindOutput<()> = FindOutput::Count(3);
        assert_eq!(output.into_count(), Some(3));

        let output: FindOutput<()> = FindOutput::Documents(vec![doc! { "a": 1 }]);
        assert_eq!(output.into_documents().map(|docs| docs.len()), Some(1));

        let output: FindOutput<u8> = FindOutput::Cursor(7);
        assert!(output.into_documents().is_none());
    }

    #[test]
    fn test_find_max_time() {
        assert_eq!(FIND_MAX_TIME.as_millis(), 90_000);
    }
}
