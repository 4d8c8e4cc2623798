//! URL parsing and file-name derivation.

use percent_encoding::percent_decode_str;
use reqwest::Url;

use crate::error::{Error, Result};

/// Parses a download URL, accepting only `http` and `https`.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the string is not an absolute HTTP(S) URL.
pub fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

/// Returns the last non-empty path segment of `url`, percent-decoded and
/// sanitized for use as a local file name.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the URL path has no file name.
pub fn file_name_from_url(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| sanitize_file_name(&percent_decode_str(name).decode_utf8_lossy()))
        .filter(|name| name != "." && name != "..")
        .ok_or_else(|| Error::InvalidUrl {
            url: url.to_string(),
            reason: "URL path has no file name".to_string(),
        })
}

/// Replaces every character that is not alphanumeric, `.`, `-` or `_` with `_`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_',
        "_",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_http_and_https() {
        assert!(parse_url("http://example.com/a.bin").is_ok());
        assert!(parse_url("  https://example.com/a.bin  ").is_ok());
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert!(matches!(
            parse_url("ftp://example.com/a.bin"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(parse_url("not a url"), Err(Error::InvalidUrl { .. })));
    }

    #[test]
    fn file_name_is_last_segment() {
        let url = parse_url(
            "https://huggingface.co/Qwen/Qwen3-32B/resolve/main/model-00001-of-00017.safetensors",
        )
        .unwrap();
        assert_eq!(
            file_name_from_url(&url).unwrap(),
            "model-00001-of-00017.safetensors"
        );
    }

    #[test]
    fn file_name_ignores_query() {
        let url = parse_url("https://cdn.example.com/shard.bin?download=true").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "shard.bin");
    }

    #[test]
    fn file_name_missing_is_error() {
        let url = parse_url("https://example.com/").unwrap();
        assert!(matches!(
            file_name_from_url(&url),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn file_name_is_percent_decoded_before_sanitizing() {
        let url = parse_url("https://example.com/my%20file.bin").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "my_file.bin");

        let url = parse_url("https://example.com/caf%C3%A9%2Bmenu.txt").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "café_menu.txt");

        // An encoded separator cannot escape the download directory.
        let url = parse_url("https://example.com/a%2F..%2Fb.bin").unwrap();
        assert_eq!(file_name_from_url(&url).unwrap(), "a_.._b.bin");
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_file_name("a-b_c.d"), "a-b_c.d");
        assert_eq!(sanitize_file_name("a b/c"), "a_b_c");
    }
}
