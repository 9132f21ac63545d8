//! Byte-key layout of the entity store.
//!
//! ```text
//! latest                                      -> BlockIdentifier
//! latest \0 <reducer>                         -> { state, block }
//! entity \0 <type> \0 <id>                    -> entity JSON
//! index  \0 <type> \0 <index> \0 <sort> \0 <id> -> id
//! ```
//!
//! Components are UTF-8 and must not contain `\0`.

use crate::entity::EntityKey;
use crate::error::IndexerError;

pub const SEPARATOR: u8 = 0x00;
pub const LATEST_KEY: &[u8] = b"latest";
const ENTITY_NS: &[u8] = b"entity";
const INDEX_NS: &[u8] = b"index";

fn check(part: &str) -> Result<&str, IndexerError> {
    if part.as_bytes().contains(&SEPARATOR) {
        return Err(IndexerError::Storage(format!(
            "key component {part:?} contains a NUL byte"
        )));
    }
    Ok(part)
}

fn compose(namespace: &[u8], parts: &[&str]) -> Result<Vec<u8>, IndexerError> {
    let mut key = namespace.to_vec();
    for part in parts {
        key.push(SEPARATOR);
        key.extend_from_slice(check(part)?.as_bytes());
    }
    Ok(key)
}

/// `latest \0 <reducer>`.
pub fn reducer_checkpoint_key(reducer: &str) -> Result<Vec<u8>, IndexerError> {
    compose(LATEST_KEY, &[reducer])
}

/// `entity \0 <type> \0 <id>`.
pub fn entity_key(entity: &str, id: &str) -> Result<Vec<u8>, IndexerError> {
    compose(ENTITY_NS, &[entity, id])
}

/// `entity \0`: the prefix shared by every entity key.
pub fn entity_prefix() -> Vec<u8> {
    let mut key = ENTITY_NS.to_vec();
    key.push(SEPARATOR);
    key
}

/// Inverse of [`entity_key`].
pub fn parse_entity_key(key: &[u8]) -> Result<EntityKey, IndexerError> {
    let rest = key
        .strip_prefix(entity_prefix().as_slice())
        .ok_or_else(|| IndexerError::Storage("not an entity key".into()))?;
    let split = rest
        .iter()
        .position(|b| *b == SEPARATOR)
        .ok_or_else(|| IndexerError::Storage("entity key without id".into()))?;
    Ok(EntityKey::new(
        utf8(&rest[..split])?,
        utf8(&rest[split + 1..])?,
    ))
}

/// `index \0 <type> \0 <index> \0`: every entry of one index starts with this.
pub fn index_base(entity: &str, index: &str) -> Result<Vec<u8>, IndexerError> {
    let mut key = compose(INDEX_NS, &[entity, index])?;
    key.push(SEPARATOR);
    Ok(key)
}

/// `index \0 <type> \0 <index> \0 <sort> \0 <id>`.
pub fn index_key(
    entity: &str,
    index: &str,
    sort_value: &str,
    id: &str,
) -> Result<Vec<u8>, IndexerError> {
    let mut key = index_base(entity, index)?;
    key.extend_from_slice(check(sort_value)?.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(check(id)?.as_bytes());
    Ok(key)
}

/// Recover the sort value from a full index key, given the length of its
/// [`index_base`] and the entity id stored as the key's value.
pub fn index_sort_value(key: &[u8], base_len: usize, id: &str) -> Result<String, IndexerError> {
    let end = key
        .len()
        .checked_sub(id.len() + 1)
        .filter(|end| *end >= base_len)
        .ok_or_else(|| IndexerError::Storage("index key shorter than its id".into()))?;
    utf8(&key[base_len..end])
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Components are UTF-8, so no key byte following a prefix is ever `0xFF`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xFF);
    end
}

fn utf8(bytes: &[u8]) -> Result<String, IndexerError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| IndexerError::Storage(format!("key is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_layout() {
        let key = entity_key("Delegate", "0xabc").unwrap();
        assert_eq!(key, b"entity\0Delegate\0\x30xabc".to_vec());
        assert!(key.starts_with(&entity_prefix()));
        assert_eq!(
            parse_entity_key(&key).unwrap(),
            EntityKey::new("Delegate", "0xabc")
        );
    }

    #[test]
    fn nul_in_component_is_rejected() {
        assert!(matches!(
            entity_key("Dele\0gate", "1"),
            Err(IndexerError::Storage(_))
        ));
        assert!(index_key("Vote", "byVoter", "a\0b", "1").is_err());
    }

    #[test]
    fn sort_value_recovered_from_index_key() {
        let base = index_base("Vote", "byProposal").unwrap();
        let key = index_key("Vote", "byProposal", "00ff", "0xtx-3").unwrap();
        assert_eq!(
            index_sort_value(&key, base.len(), "0xtx-3").unwrap(),
            "00ff"
        );
        assert!(index_sort_value(&base, base.len(), "0xtx-3").is_err());
    }

    #[test]
    fn namespaces_do_not_overlap() {
        let latest = reducer_checkpoint_key("ENSToken").unwrap();
        let entity = entity_prefix();
        let end = prefix_end(&entity);
        assert!(!(latest >= entity && latest < end));
        let idx = index_key("Delegate", "byX", "1", "a").unwrap();
        assert!(!(idx >= entity && idx < end));
    }
}
