//! Relay-style forward pagination over an entity index.
//!
//! Cursors are `"<indexKey>|<entityId>"`. Edge `i > 0` carries the position of
//! edge `i - 1`, so passing an edge's cursor as `after` resumes at that edge;
//! edge 0 carries `""`. `endCursor` is the last edge's own position, which is
//! the cursor the first edge of the next page would carry.

use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use govindex_core::error::IndexerError;
use govindex_core::store::{IndexScan, IndexedEntity, ReadOnlyEntityStore, ScanPosition};

const CURSOR_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub has_next_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub node: Value,
    pub cursor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

pub fn encode_cursor(index_key: &str, entity_id: &str) -> String {
    format!("{index_key}{CURSOR_SEPARATOR}{entity_id}")
}

/// Split a cursor at its last `|`. Sort values may contain `|`; ids never do.
pub fn decode_cursor(cursor: &str) -> Result<ScanPosition, IndexerError> {
    let (index_key, entity_id) = cursor
        .rsplit_once(CURSOR_SEPARATOR)
        .ok_or_else(|| IndexerError::InvalidCursor(cursor.to_string()))?;
    Ok(ScanPosition {
        index_key: index_key.to_string(),
        entity_id: Some(entity_id.to_string()),
    })
}

fn position(entry: &IndexedEntity) -> String {
    encode_cursor(&entry.index_key, &entry.entity_id)
}

/// Read up to `first` entities of `entity` ordered by `index`, strictly after
/// the `after` cursor and restricted to sort values starting with `prefix`.
///
/// An empty `after` is treated as absent, matching the cursor of a page's
/// first edge. `first` must be at least 1.
pub async fn page_by_index<S>(
    store: &S,
    entity: &str,
    index: &str,
    first: usize,
    after: Option<&str>,
    prefix: Option<&str>,
) -> Result<Connection, IndexerError>
where
    S: ReadOnlyEntityStore + ?Sized,
{
    if first == 0 {
        return Err(IndexerError::InvalidPage("`first` must be at least 1".into()));
    }
    let scan = IndexScan {
        prefix: prefix.map(str::to_string),
        starting: match after.filter(|c| !c.is_empty()) {
            Some(cursor) => Some(decode_cursor(cursor)?),
            None => None,
        },
    };

    let mut entries: Vec<IndexedEntity> = store
        .get_entities_by_index(entity, index, scan)
        .take(first + 1)
        .try_collect()
        .await?;

    let has_next_page = entries.len() > first;
    entries.truncate(first);

    let end_cursor = entries.last().map(position);
    let mut edges = Vec::with_capacity(entries.len());
    let mut previous: Option<String> = None;
    for entry in entries {
        let cursor = previous.replace(position(&entry)).unwrap_or_default();
        edges.push(Edge {
            node: entry.value,
            cursor,
        });
    }

    Ok(Connection {
        edges,
        page_info: PageInfo {
            has_previous_page: false,
            start_cursor: None,
            has_next_page,
            end_cursor,
        },
    })
}
