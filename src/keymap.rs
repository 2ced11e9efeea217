use crate::lister::ObjectSummary;

/// Destination key for `source_key`: `dest_prefix` followed by whatever of the
/// source key lies past the first `source_prefix_len` bytes.
///
/// Plain string concatenation. Separators are neither added nor collapsed.
pub fn map_key(source_key: &str, source_prefix_len: usize, dest_prefix: &str) -> String {
    let suffix = source_key.get(source_prefix_len..).unwrap_or("");
    let mut dest_key = String::with_capacity(dest_prefix.len() + suffix.len());
    dest_key.push_str(dest_prefix);
    dest_key.push_str(suffix);
    dest_key
}

/// One object to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTask {
    pub source_key: String,
    pub dest_key: String,
    pub expected_size: i64,
}

impl CopyTask {
    pub fn from_summary(
        summary: ObjectSummary,
        source_prefix_len: usize,
        dest_prefix: &str,
    ) -> Self {
        let dest_key = map_key(&summary.key, source_prefix_len, dest_prefix);
        Self {
            source_key: summary.key,
            dest_key,
            expected_size: summary.size,
        }
    }
}
