//! Hierarchical dot-delimited tags.

/// Chop a tag into its hierarchical levels:
/// `"a.b.c"` yields `["a", "a.b", "a.b.c"]`.
pub fn chop_tag(tag: &str) -> Vec<String> {
    let parts: Vec<&str> = tag.split('.').collect();
    (0..parts.len()).map(|i| parts[..=i].join(".")).collect()
}
