use crate::catalog::types::timestamp_score;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

pub const DEFAULT_TRACES_PER_PAGE: usize = 100;

/// Filters for trace search. All present filters must match.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQuery {
    /// Matches trace names starting with this text.
    pub name: Option<String>,
    pub scope: Option<String>,
    /// Exact top-level attribute values.
    pub attributes: BTreeMap<String, JsonValue>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    /// Zero-based.
    pub page: usize,
    pub per_page: usize,
}

impl Default for TraceQuery {
    fn default() -> Self {
        Self {
            name: None,
            scope: None,
            attributes: BTreeMap::new(),
            from_date: None,
            to_date: None,
            page: 0,
            per_page: DEFAULT_TRACES_PER_PAGE,
        }
    }
}

impl TraceQuery {
    pub fn page(page: usize, per_page: usize) -> Self {
        Self {
            page,
            per_page,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, prefix: impl Into<String>) -> Self {
        self.name = Some(prefix.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRunsQuery {
    pub namespace: Option<String>,
    pub workflow_name: Option<String>,
    pub resource_id: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl WorkflowRunsQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn workflow_name(mut self, workflow_name: impl Into<String>) -> Self {
        self.workflow_name = Some(workflow_name.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    pub fn paginate(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Rows without test info.
    Live,
    /// Rows carrying test info.
    Test,
}

/// A message plus up to `previous` earlier and `next` later neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWindow {
    pub id: String,
    pub previous: usize,
    pub next: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSelection {
    /// The final `n` messages of the thread.
    pub last: Option<usize>,
    pub include: Vec<MessageWindow>,
}

impl MessageSelection {
    pub fn last(n: usize) -> Self {
        Self {
            last: Some(n),
            include: Vec::new(),
        }
    }

    pub fn include(mut self, id: impl Into<String>, previous: usize, next: usize) -> Self {
        self.include.push(MessageWindow {
            id: id.into(),
            previous,
            next,
        });
        self
    }
}

/// Inclusive score bounds derived from an optional date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: i64,
    pub max: i64,
}

impl ScoreRange {
    pub const ALL: ScoreRange = ScoreRange {
        min: i64::MIN,
        max: i64::MAX,
    };

    pub fn from_dates(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            min: from.as_ref().map_or(i64::MIN, timestamp_score),
            max: to.as_ref().map_or(i64::MAX, timestamp_score),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::timestamp_from_millis;

    #[test]
    fn date_ranges_are_inclusive_and_open_ended() {
        let from = timestamp_from_millis(1_000);
        let to = timestamp_from_millis(2_000);
        let range = ScoreRange::from_dates(from, to);
        assert_eq!(range.min, 1_000_000_000);
        assert_eq!(range.max, 2_000_000_000);
        assert_eq!(ScoreRange::from_dates(None, None), ScoreRange::ALL);
        assert!(ScoreRange::from_dates(to, from).is_empty());
    }

    #[test]
    fn builders_fill_filters() {
        let q = TraceQuery::page(1, 5)
            .with_name("agent")
            .with_attribute("env", "prod");
        assert_eq!(q.per_page, 5);
        assert_eq!(q.attributes.get("env"), Some(&JsonValue::from("prod")));

        let sel = MessageSelection::last(2).include("m-1", 1, 0);
        assert_eq!(sel.include[0].previous, 1);
        assert_eq!(TraceQuery::default().per_page, DEFAULT_TRACES_PER_PAGE);
    }
}
