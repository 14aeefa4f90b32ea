// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Resolve a potentially relative URL against a base URL.
///
/// Falls back to `href` unchanged when either side does not parse.
///
/// # Examples
/// ```
/// use eratv::utils::url::resolve;
///
/// assert_eq!(
///     resolve("https://eratv.era.europa.eu/Eratv/Home/List", "/Eratv/Home/View/1"),
///     "https://eratv.era.europa.eu/Eratv/Home/View/1"
/// );
/// ```
pub fn resolve(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Recover a vehicle-type identifier from a detail-page URL.
///
/// Looks at the `id`/`typeId` query parameters first, then the last
/// non-empty path segment.
pub fn extract_type_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    for (key, value) in parsed.query_pairs() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if matches!(
            key.to_lowercase().as_str(),
            "id" | "typeid" | "type_id" | "vehicletypeid"
        ) {
            return Some(value.to_string());
        }
    }

    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|last| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        assert_eq!(
            resolve("https://example.com/path/", "https://other.com/page"),
            "https://other.com/page"
        );
    }

    #[test]
    fn test_resolve_absolute_path() {
        assert_eq!(
            resolve("https://example.com/path/", "/root.html?exportTo=XML"),
            "https://example.com/root.html?exportTo=XML"
        );
    }

    #[test]
    fn test_resolve_relative_from_file() {
        assert_eq!(
            resolve("https://example.com/path/index.html", "other.html"),
            "https://example.com/path/other.html"
        );
    }

    #[test]
    fn test_resolve_invalid_base_keeps_href() {
        assert_eq!(resolve("not a url", "page.html"), "page.html");
    }

    #[test]
    fn test_extract_type_id_query() {
        let url = "https://eratv.era.europa.eu/Eratv/Home/View?typeId=32-000001&x=1";
        assert_eq!(extract_type_id(url), Some("32-000001".to_string()));
    }

    #[test]
    fn test_extract_type_id_path() {
        let url = "https://eratv.era.europa.eu/Eratv/Home/View/12-345-0001/";
        assert_eq!(extract_type_id(url), Some("12-345-0001".to_string()));
    }

    #[test]
    fn test_extract_type_id_invalid() {
        assert_eq!(extract_type_id("not a url"), None);
    }
}
