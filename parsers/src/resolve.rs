//! Reference resolution shared by the HTML and CSS scanners

use url::Url;

/// Resolve a possibly-relative reference against a base document URI
///
/// Fragment-only references and non-fetchable schemes (`data:`,
/// `javascript:`, `about:`, `mailto:`, ...) resolve to nothing; only
/// `http` and `https` targets are fetchable sub-resources.
pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let resolved = match Url::parse(href) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(href).ok()?,
        Err(_) => return None,
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}
