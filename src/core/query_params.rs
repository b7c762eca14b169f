use std::collections::HashMap;

/// Parse query parameters from a URI string.
///
/// Handles URL decoding (including `+` as space) and returns a HashMap of
/// parameter key-value pairs. Multiple values for the same key are not
/// supported (only the last is kept).
///
/// # Example
/// ```
/// use yatube::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/group/cats/?page=2&q=a+b");
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// assert_eq!(params.get("q"), Some(&"a b".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.find('?') {
        Some(query_start) => parse_urlencoded(&uri[query_start + 1..]),
        None => HashMap::new(),
    }
}

/// Decode an `application/x-www-form-urlencoded` string.
pub fn parse_urlencoded(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in query.split('&').filter(|p| !p.is_empty()) {
        if let Some(eq_idx) = param.find('=') {
            let key = decode_component(&param[..eq_idx]);
            let value = decode_component(&param[eq_idx + 1..]);
            params.insert(key, value);
        } else {
            // Flag parameter without value
            params.insert(decode_component(param), String::new());
        }
    }

    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Get a string parameter from parsed query params with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params.get(key)
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Encode a local path for use as a `next` parameter, keeping slashes readable.
pub fn encode_next(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_query_yields_empty_map() {
        assert!(parse_query_params("/profile/leo/").is_empty());
    }

    #[test]
    fn decodes_values_and_flags() {
        let params = parse_query_params("/?page=3&next=%2Fcreate%2F&debug&name=a+b%21");
        assert_eq!(params.get("page").map(String::as_str), Some("3"));
        assert_eq!(params.get("next").map(String::as_str), Some("/create/"));
        assert_eq!(params.get("debug").map(String::as_str), Some(""));
        assert_eq!(params.get("name").map(String::as_str), Some("a b!"));
    }

    #[test]
    fn last_value_wins() {
        let params = parse_urlencoded("page=1&page=2");
        assert_eq!(get_string(&params, "page", None).as_deref(), Some("2"));
        assert_eq!(get_string(&params, "missing", Some("x")).as_deref(), Some("x"));
    }

    #[test]
    fn next_keeps_slashes() {
        assert_eq!(encode_next("/posts/4/edit/"), "/posts/4/edit/");
        assert_eq!(encode_next("/a b/"), "/a%20b/");
    }
}
