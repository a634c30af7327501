//! Video reference parsing.
//!
//! Accepts a bare 11-character id or any of the YouTube URL shapes users
//! paste: `watch?v=`, `youtu.be/`, `/embed/`, `/v/` and `/shorts/`.

use reqwest::Url;

use crate::{MuninnError, Result};

const ID_LEN: usize = 11;

const QUERY_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

const PATH_PREFIXES: &[&str] = &["embed", "v", "shorts"];

/// Whether `id` has the shape of a video id.
pub fn validate_id(id: &str) -> bool {
    id.len() == ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extract the video id from a bare id or a YouTube URL.
pub fn parse_video_id(reference: &str) -> Result<String> {
    let reference = reference.trim();
    if validate_id(reference) {
        return Ok(reference.to_string());
    }
    if !(reference.starts_with("http://") || reference.starts_with("https://")) {
        return Err(MuninnError::InvalidReference(reference.to_string()));
    }

    let url = Url::parse(reference)
        .map_err(|e| MuninnError::InvalidReference(format!("{reference}: {e}")))?;
    let host = url.host_str().unwrap_or_default();

    let candidate = if host == "youtu.be" {
        url.path_segments().and_then(|mut s| s.next()).map(str::to_string)
    } else if QUERY_HOSTS.contains(&host) {
        url.query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())
            .or_else(|| {
                let mut segments = url.path_segments()?;
                let prefix = segments.next()?;
                PATH_PREFIXES
                    .contains(&prefix)
                    .then(|| segments.next().map(str::to_string))
                    .flatten()
            })
    } else {
        return Err(MuninnError::InvalidReference(format!(
            "not a YouTube domain: {host}"
        )));
    };

    let id: String = candidate
        .filter(|id| !id.is_empty())
        .ok_or_else(|| MuninnError::InvalidReference(format!("no video id in {reference}")))?
        .chars()
        .take(ID_LEN)
        .collect();
    if !validate_id(&id) {
        return Err(MuninnError::InvalidReference(format!(
            "malformed video id: {id}"
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id() {
        assert_eq!(parse_video_id(" dQw4w9WgXcQ ").unwrap(), "dQw4w9WgXcQ");
    }

    #[test]
    fn url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "http://www.youtube.com/v/dQw4w9WgXcQ",
        ] {
            assert_eq!(parse_video_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn long_ids_are_truncated() {
        assert_eq!(
            parse_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQxyz").unwrap(),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn rejects_other_domains_and_garbage() {
        assert!(parse_video_id("https://vimeo.com/watch?v=dQw4w9WgXcQ").is_err());
        assert!(parse_video_id("https://www.youtube.com/watch?v=short").is_err());
        assert!(parse_video_id("https://www.youtube.com/feed/trending").is_err());
        assert!(parse_video_id("not a link").is_err());
    }
}
