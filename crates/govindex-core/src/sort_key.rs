//! Order-preserving sort strings for index definitions.
//!
//! Index entries are compared byte-wise, so numeric keys are rendered as
//! fixed-width lowercase hex of their big-endian bytes. Descending order flips
//! every bit first.

/// Ascending key for a big-endian unsigned integer.
pub fn uint_asc(be_bytes: &[u8]) -> String {
    hex::encode(be_bytes)
}

/// Descending key for a big-endian unsigned integer.
pub fn uint_desc(be_bytes: &[u8]) -> String {
    let inverted: Vec<u8> = be_bytes.iter().map(|b| !b).collect();
    hex::encode(inverted)
}

pub fn u64_asc(n: u64) -> String {
    uint_asc(&n.to_be_bytes())
}

pub fn u64_desc(n: u64) -> String {
    uint_desc(&n.to_be_bytes())
}

/// Text keys sort by their UTF-8 bytes; ASCII-lowercased so addresses group
/// regardless of checksum casing.
pub fn text(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Composite key. Parts are separated by `\x01`, which sorts below every
/// printable character, so a shorter leading part orders first.
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\u{1}")
}
