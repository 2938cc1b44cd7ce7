use std::sync::OnceLock;

use regex::Regex;

use crate::client::ApiResponse;

fn next_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("static regex is valid")
    })
}

/// Extract the path (plus query) of the next page from a `Link` header value.
pub fn next_page_path(link_header: &str) -> Option<String> {
    let captures = next_link_pattern().captures(link_header)?;
    let url = captures.get(1)?.as_str();
    Some(strip_origin(url).to_string())
}

/// Next page of a paginated response, if the server advertised one.
pub fn next_page(response: &ApiResponse) -> Option<String> {
    response.header("link").and_then(next_page_path)
}

fn strip_origin(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) => &rest[path_start..],
                None => "/",
            }
        }
        None => url,
    }
}
