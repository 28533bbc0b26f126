//! Storage key layout.
//!
//! A name with labels `[l0, l1, ..., ln]` (DNS order, `l0` leftmost) is
//! stored under the hash key `prefix:ln:...:l1:l0`, or `ln:...:l1:l0` when no
//! prefix is configured. Each record type is a field of that hash.

/// Segment separator within a key
pub const SEPARATOR: &str = ":";

/// Marker replacing the leftmost label in a wildcard key
pub const WILDCARD: &str = "*";

/// Derive the hash key for `name`.
pub fn derive_key(name: &str, prefix: &str) -> String {
    let mut segments: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
    segments.reverse();
    if !prefix.is_empty() {
        segments.insert(0, prefix);
    }
    segments.join(SEPARATOR)
}

/// Replace the last segment of `key` (the name's leftmost label) with the
/// wildcard marker.
pub fn wildcard_of(key: &str) -> String {
    match key.rsplit_once(SEPARATOR) {
        Some((parent, _)) => format!("{}{}{}", parent, SEPARATOR, WILDCARD),
        None => WILDCARD.to_string(),
    }
}

pub fn is_wildcard(key: &str) -> bool {
    key.rsplit(SEPARATOR).next() == Some(WILDCARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_reverses_labels() {
        assert_eq!(derive_key("a.b.c.", ""), "c:b:a");
        assert_eq!(derive_key("a.b.c.", "p"), "p:c:b:a");
        assert_eq!(derive_key("www.example.com", "dns"), "dns:com:example:www");
    }

    #[test]
    fn test_segments_use_separator() {
        let key = derive_key("mail.example.org.", "zone");
        assert_eq!(key.split(SEPARATOR).collect::<Vec<_>>(), ["zone", "org", "example", "mail"]);
        assert_eq!(key.matches(SEPARATOR).count(), 3);
    }

    #[test]
    fn test_derive_key_root() {
        assert_eq!(derive_key(".", ""), "");
        assert_eq!(derive_key(".", "p"), "p");
    }

    #[test]
    fn test_wildcard_replaces_leftmost_label() {
        let key = derive_key("www.example.com.", "p");
        assert_eq!(wildcard_of(&key), "p:com:example:*");
        assert!(is_wildcard(&wildcard_of(&key)));
        assert!(!is_wildcard(&key));
        assert_ne!(wildcard_of(&key), key);
    }

    #[test]
    fn test_wildcard_is_idempotent() {
        for key in ["c:b:a", "p:c:b:a", "single"] {
            let once = wildcard_of(key);
            assert_eq!(wildcard_of(&once), once);
        }
    }
}
