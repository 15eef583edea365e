use crate::catalog::schema::TableSchema;
use crate::catalog::types::Record;
use crate::error::KvRelError;
use crate::query::plan::ScoreRange;
use crate::storage::backend::ScoredMember;
use crate::storage::table::TableStore;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Where candidate rows come from. Several sources are intersected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// One group of an index.
    Group { index: String, group: Vec<String> },
    /// Every group of a directory-tracking index whose first component
    /// starts with `prefix`.
    GroupPrefix { index: String, prefix: String },
}

impl Source {
    pub fn group(index: &str, group: &[&str]) -> Self {
        Source::Group {
            index: index.to_string(),
            group: group.iter().map(|g| (*g).to_string()).collect(),
        }
    }
}

/// Members matching every source within `range`, most recent first. Ties
/// break by member. No sources means the whole table.
pub async fn collect_candidates(
    tables: &TableStore,
    schema: &TableSchema,
    sources: &[Source],
    range: ScoreRange,
) -> Result<Vec<ScoredMember>, KvRelError> {
    if range.is_empty() {
        return Ok(Vec::new());
    }
    let mut candidates = match sources.split_first() {
        None => tables.registry_range(schema, range.min, range.max).await?,
        Some((first, rest)) => {
            let mut current = read_source(tables, schema, first, range).await?;
            for source in rest {
                if current.is_empty() {
                    break;
                }
                let other: HashSet<String> = read_source(tables, schema, source, range)
                    .await?
                    .into_iter()
                    .map(|m| m.member)
                    .collect();
                current.retain(|m| other.contains(&m.member));
            }
            current
        }
    };
    candidates.sort_by(|a, b| {
        Reverse(a.score)
            .cmp(&Reverse(b.score))
            .then_with(|| a.member.cmp(&b.member))
    });
    Ok(candidates)
}

async fn read_source(
    tables: &TableStore,
    schema: &TableSchema,
    source: &Source,
    range: ScoreRange,
) -> Result<Vec<ScoredMember>, KvRelError> {
    match source {
        Source::Group { index, group } => {
            tables
                .index_range(schema, index, group, range.min, range.max)
                .await
        }
        Source::GroupPrefix { index, prefix } => {
            let mut merged: BTreeMap<String, i64> = BTreeMap::new();
            for group in tables.index_groups(schema, index).await? {
                if !group.first().is_some_and(|g| g.starts_with(prefix.as_str())) {
                    continue;
                }
                for m in tables
                    .index_range(schema, index, &group, range.min, range.max)
                    .await?
                {
                    merged.insert(m.member, m.score);
                }
            }
            Ok(merged
                .into_iter()
                .map(|(member, score)| ScoredMember::new(member, score))
                .collect())
        }
    }
}

pub fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Loads rows for `members` in order. Members whose row is gone are
/// skipped.
pub async fn load_members(
    tables: &TableStore,
    schema: &TableSchema,
    members: &[String],
) -> Result<Vec<Record>, KvRelError> {
    let rows = tables.fetch_many(schema, members).await?;
    Ok(members
        .iter()
        .zip(rows)
        .filter_map(|(member, row)| match row {
            Some(row) => Some(row.record),
            None => {
                warn!(
                    table = %schema.table_name,
                    member = %member,
                    "index member without row"
                );
                None
            }
        })
        .collect())
}
