use std::borrow::Cow;
use std::collections::HashMap;

/// Parse a raw query string into a map.
///
/// Pairs are split on `&` and then on the first `=`; a pair without `=` maps
/// to an empty value. Keys and values are percent-decoded and `+` becomes a
/// space. When a key repeats, the last occurrence wins.
///
/// # Example
///
/// ```
/// use brrtserver::http::parse_query;
///
/// let q = parse_query("a=1&a=2&flag&name=J%C3%BCrgen+K");
/// assert_eq!(q["a"], "2");
/// assert_eq!(q["flag"], "");
/// assert_eq!(q["name"], "Jürgen K");
/// ```
#[must_use]
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    if raw.is_empty() {
        return HashMap::new();
    }
    // `collect` into a HashMap keeps the last value for duplicate keys.
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Percent-decode a request path.
///
/// `+` is left untouched (it only means space inside a query). Paths without
/// `%` are returned as-is. When the decoded bytes are not valid UTF-8 the
/// input is returned unchanged, so the result never fails.
#[must_use]
pub fn decode_path(path: &str) -> Cow<'_, str> {
    if !path.contains('%') {
        return Cow::Borrowed(path);
    }
    let decoded = urlencoding::decode_binary(path.as_bytes());
    match String::from_utf8(decoded.into_owned()) {
        Ok(s) => Cow::Owned(s),
        Err(_) => Cow::Borrowed(path),
    }
}
