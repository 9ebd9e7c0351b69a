//! Topic namespacing
//!
//! Raw topics are the names application code uses. On the wire every raw
//! topic lives under a secret prefix: `prefix + "/" + raw`. The helpers
//! here are pure string transforms plus the validation that keeps the
//! mapping injective.

#[cfg(test)]
mod tests;

/// Separator between the prefix and the raw topic
pub const TOPIC_SEPARATOR: char = '/';

/// Build the wire topic for `raw` under `prefix`
pub fn join_secret_prefix(prefix: &str, raw: &str) -> String {
    let mut wire = String::with_capacity(prefix.len() + 1 + raw.len());
    wire.push_str(prefix);
    wire.push(TOPIC_SEPARATOR);
    wire.push_str(raw);
    wire
}

/// Strip `prefix + "/"` from a wire topic.
///
/// Topics outside the namespace are returned unchanged.
pub fn remove_secret_prefix<'a>(prefix: &str, wire: &'a str) -> &'a str {
    wire.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(TOPIC_SEPARATOR))
        .unwrap_or(wire)
}

/// Validate a raw topic
///
/// Raw topics:
/// - Must be at least 1 character
/// - Must not contain null character
/// - Must not contain wildcards (+ or #)
pub fn validate_raw_topic(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err("topic cannot be empty");
    }

    if raw.contains('\0') {
        return Err("topic cannot contain null character");
    }

    if raw.contains(['+', '#']) {
        return Err("topic cannot contain wildcards");
    }

    // Leave room for the prefix within the 65535 byte limit
    if raw.len() > u16::MAX as usize / 2 {
        return Err("topic exceeds maximum length");
    }

    Ok(())
}

/// Validate a secret prefix
///
/// The prefix is a single topic level: non-empty, no wildcards, no `/`
/// and no null character.
pub fn validate_secret_prefix(prefix: &str) -> Result<(), &'static str> {
    if prefix.is_empty() {
        return Err("secret prefix cannot be empty");
    }

    if prefix.contains('\0') {
        return Err("secret prefix cannot contain null character");
    }

    if prefix.contains(['+', '#']) {
        return Err("secret prefix cannot contain wildcards");
    }

    if prefix.contains(TOPIC_SEPARATOR) {
        return Err("secret prefix must be a single topic level");
    }

    if prefix.len() > u16::MAX as usize / 2 {
        return Err("secret prefix exceeds maximum length");
    }

    Ok(())
}
