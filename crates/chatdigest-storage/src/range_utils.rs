//! Prefix scan helpers for the string-keyed tables.

/// Exclusive end bound for a prefix scan.
///
/// `"chat-1:"` becomes `"chat-1;"`: the last byte is bumped so every key that
/// starts with the prefix sorts strictly below the bound.
pub fn prefix_end_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }

    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.saturating_add(1);
    }

    String::from_utf8(bytes).unwrap_or_else(|_| format!("{}\x7F", prefix))
}

/// Key prefix owning every row of one conversation.
///
/// The id is length-prefixed, so no id's prefix is a prefix of another's
/// even when ids contain the `:` separator.
pub fn conversation_prefix(conversation_id: &str) -> String {
    format!("{:08x}:{}:", conversation_id.len(), conversation_id)
}

/// `(start, end)` bounds for `table.range(start..end)`.
pub fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), prefix_end_bound(prefix))
}
