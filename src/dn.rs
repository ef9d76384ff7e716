//! Distinguished-name validation and escaping.
//!
//! The entity layer treats DN assignment as best-effort: an invalid value is
//! rejected by [`validate_dn`] and the caller ignores the assignment. The
//! escaping rules follow RFC 4514.

use crate::error::{DirectoryError, DirectoryResult};

/// Check that a value is a syntactically legal distinguished name.
///
/// Each comma-separated RDN must be an `attribute=value` pair with a legal
/// attribute descriptor (alphanumeric, `-`, or `.` for OID forms) and a
/// non-empty value. Escaped characters (`\,` and friends) do not terminate
/// an RDN.
pub fn validate_dn(value: &str) -> DirectoryResult<()> {
    let malformed = || DirectoryError::MalformedDn {
        value: value.to_string(),
    };

    if value.trim().is_empty() {
        return Err(malformed());
    }

    for rdn in split_unescaped(value, ',') {
        let rdn = rdn.trim();
        let Some(eq) = find_unescaped(rdn, '=') else {
            return Err(malformed());
        };

        let attribute = rdn[..eq].trim();
        let attr_value = rdn[eq + 1..].trim();

        if attribute.is_empty() || attr_value.is_empty() {
            return Err(malformed());
        }
        if !attribute
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(malformed());
        }
    }

    Ok(())
}

/// Escape special characters in DN attribute values per RFC 4514.
///
/// Escaped: leading/trailing space, leading `#`, the characters
/// `, + " \ < > ; =`, and NUL.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let char_count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i == char_count - 1;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

/// Split the leading RDN off a DN, honoring escapes.
///
/// Returns the RDN and the parent DN (`None` for a single-RDN name).
#[must_use]
pub fn split_rdn(dn: &str) -> (&str, Option<&str>) {
    match find_unescaped(dn, ',') {
        Some(idx) => (&dn[..idx], Some(dn[idx + 1..].trim_start())),
        None => (dn, None),
    }
}

/// Split a string on unescaped occurrences of `sep`.
fn split_unescaped(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, ch) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(&value[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Find the first unescaped occurrence of `needle`.
fn find_unescaped(value: &str, needle: char) -> Option<usize> {
    let mut escaped = false;
    for (i, ch) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == needle {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_dns() {
        assert!(validate_dn("cn=editors,dc=example,dc=com").is_ok());
        assert!(validate_dn("uid=jdoe,ou=people,dc=example,dc=com").is_ok());
        assert!(validate_dn("cn=admin").is_ok());
        assert!(validate_dn("2.5.4.3=legacy,dc=example,dc=com").is_ok());
    }

    #[test]
    fn accepts_escaped_commas_in_values() {
        assert!(validate_dn("cn=Doe\\, John,dc=example,dc=com").is_ok());
    }

    #[test]
    fn rejects_malformed_dns() {
        assert!(validate_dn("").is_err());
        assert!(validate_dn("   ").is_err());
        assert!(validate_dn("not a dn").is_err());
        assert!(validate_dn("cn=editors,,dc=com").is_err());
        assert!(validate_dn("cn=,dc=example,dc=com").is_err());
        assert!(validate_dn("=value,dc=example,dc=com").is_err());
        assert!(validate_dn("c n=editors,dc=example,dc=com").is_err());
    }

    #[test]
    fn escape_dn_value_special_chars() {
        assert_eq!(escape_dn_value("John Doe"), "John Doe");
        assert_eq!(escape_dn_value("a,b"), "a\\,b");
        assert_eq!(escape_dn_value("a+b"), "a\\+b");
        assert_eq!(escape_dn_value("a\\b"), "a\\\\b");
        assert_eq!(escape_dn_value("a=b"), "a\\=b");
        assert_eq!(escape_dn_value(" lead"), "\\20lead");
        assert_eq!(escape_dn_value("trail "), "trail\\20");
        assert_eq!(escape_dn_value("#hash"), "\\23hash");
        assert_eq!(escape_dn_value(""), "");
    }

    #[test]
    fn escape_dn_value_blocks_injection() {
        assert_eq!(
            escape_dn_value("admin,dc=evil,dc=com"),
            "admin\\,dc\\=evil\\,dc\\=com"
        );
    }

    #[test]
    fn split_rdn_parts() {
        assert_eq!(
            split_rdn("cn=editors,dc=example,dc=com"),
            ("cn=editors", Some("dc=example,dc=com"))
        );
        assert_eq!(split_rdn("dc=com"), ("dc=com", None));
        assert_eq!(
            split_rdn("cn=Doe\\, John,dc=example,dc=com"),
            ("cn=Doe\\, John", Some("dc=example,dc=com"))
        );
    }
}
