//! Collection directory name sanitization.
//!
//! Collection names come from an external catalog and may contain characters
//! that are invalid on Windows or ambiguous on Unix. The sanitized name is
//! used as the collection directory under the storage root.

/// Characters that are invalid in Windows filenames.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a display name for use as a collection directory name.
///
/// Control characters and Windows-invalid characters are dropped, consecutive
/// whitespace is collapsed, and leading/trailing spaces and dots are trimmed.
/// Returns "unnamed" when nothing usable remains.
pub fn sanitize_collection_name(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_space = false;

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            continue;
        }
        if c.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(c);
            last_was_space = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Slug used as the stable prefix of reconciliation-generated episode ids.
pub fn collection_slug(name: &str) -> String {
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}
