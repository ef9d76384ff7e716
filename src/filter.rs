//! LDAP search-filter construction.
//!
//! Role and user lookups share the same shape: an AND of `objectclass`
//! terms, optionally wrapped with a raw extra fragment from configuration.

/// Build the search filter locating role (or user) entries.
///
/// All listed object classes must match. When `extra_filter` is a non-empty
/// fragment it is ANDed around the whole object-class clause, verbatim: the
/// fragment comes from trusted configuration and is not escaped.
#[must_use]
pub fn class_filter(object_classes: &[String], extra_filter: Option<&str>) -> String {
    let terms: String = object_classes
        .iter()
        .map(|oc| format!("(objectclass={oc})"))
        .collect();
    let clause = format!("(&{terms})");

    match extra_filter {
        Some(extra) if !extra.is_empty() => format!("(&{clause}{extra})"),
        _ => clause,
    }
}

/// Build the filter locating one entry by its naming attribute.
///
/// The name is escaped; the class clause is used as-is.
#[must_use]
pub fn name_filter(name_attribute: &str, name: &str, class_clause: &str) -> String {
    format!(
        "(&({}={}){})",
        name_attribute,
        escape_filter_value(name),
        class_clause
    )
}

/// Escape special characters in LDAP filter values (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}
