//! Distinguished name utilities
//!
//! Lightweight string handling for DNs as returned by directory servers:
//! splitting into RDNs, case-insensitive normalization and extraction of
//! attribute values. Escaped separators (`\,`, `\+`, `\=`, `\2C`) are honoured.

/// Split a DN into its RDN components, most specific first
pub fn split_dn(dn: &str) -> Vec<&str> {
    split_unescaped(dn, ',')
        .into_iter()
        .map(str::trim)
        .filter(|rdn| !rdn.is_empty())
        .collect()
}

/// Normalize a DN for case-insensitive comparison
///
/// Whitespace around separators is dropped and attribute types and values are
/// lowercased, so `CN=Horatio Hornblower, OU=people,o=sevenSeas` and
/// `cn=horatio hornblower,ou=people,o=sevenseas` normalize identically.
pub fn normalize_dn(dn: &str) -> String {
    split_dn(dn)
        .into_iter()
        .map(|rdn| {
            split_unescaped(rdn, '+')
                .into_iter()
                .map(|ava| match split_once_unescaped(ava, '=') {
                    Some((attr, value)) => format!(
                        "{}={}",
                        attr.trim().to_lowercase(),
                        value.trim().to_lowercase()
                    ),
                    None => ava.trim().to_lowercase(),
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether two DNs name the same entry, ignoring case and spacing
pub fn dn_equals(a: &str, b: &str) -> bool {
    normalize_dn(a) == normalize_dn(b)
}

/// The unescaped value of the first attribute of the leading RDN
///
/// `cn=HMS Victory,ou=crews,ou=groups,o=sevenSeas` yields `HMS Victory`.
pub fn leading_rdn_value(dn: &str) -> Option<String> {
    let rdn = split_dn(dn).into_iter().next()?;
    let ava = split_unescaped(rdn, '+').into_iter().next()?;
    let (_, value) = split_once_unescaped(ava, '=')?;
    Some(unescape_value(value.trim()))
}

/// The unescaped value of the most specific RDN with the given attribute type
pub fn rdn_value(dn: &str, attribute: &str) -> Option<String> {
    split_dn(dn)
        .into_iter()
        .flat_map(|rdn| split_unescaped(rdn, '+'))
        .filter_map(|ava| split_once_unescaped(ava, '='))
        .find(|(attr, _)| attr.trim().eq_ignore_ascii_case(attribute))
        .map(|(_, value)| unescape_value(value.trim()))
}

/// The DN of the parent entry, or an empty string for a top-level entry
pub fn parent_dn(dn: &str) -> String {
    split_dn(dn).into_iter().skip(1).collect::<Vec<_>>().join(",")
}

/// Resolve `\,` style and `\2C` style escapes in an attribute value
pub fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn split_unescaped(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == separator {
            parts.push(&input[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn split_once_unescaped(input: &str, separator: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == separator {
            return Some((&input[..idx], &input[idx + ch.len_utf8()..]));
        }
    }
    None
}
