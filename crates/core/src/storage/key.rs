//! Object key recovery from stored attachment URLs.

/// Markers tried when no configuration overrides them.
pub const DEFAULT_KEY_MARKERS: &[&str] = &[".amazonaws.com/"];

/// Recover the object key from a stored attachment URL.
///
/// The first marker found in the URL wins and the key is everything after it.
/// Without a marker the URL is read path-style (`scheme://host/bucket/key...`)
/// and the scheme, host, and bucket segments are dropped. Query strings and
/// fragments never belong to the key.
///
/// Returns `None` when neither form yields a non-empty key.
pub fn derive_blob_key<M: AsRef<str>>(url: &str, markers: &[M]) -> Option<String> {
    let url = strip_query(url.trim());

    for marker in markers {
        let marker = marker.as_ref();
        if marker.is_empty() {
            continue;
        }
        if let Some((_, key)) = url.split_once(marker) {
            let key = key.trim_start_matches('/');
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
    }

    path_style_key(url)
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn path_style_key(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }

    let mut segments = rest.split('/');
    segments.next().filter(|host| !host.is_empty())?;
    segments.next().filter(|bucket| !bucket.is_empty())?;

    let key = segments
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    (!key.is_empty()).then_some(key)
}
