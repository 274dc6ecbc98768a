//! Handshake header assembly.
//!
//! Headers come from three sources with a fixed precedence:
//!
//! 1. explicit `-H` lines
//! 2. the headers file (`-F`), only for names not already present
//! 3. generated `User-Agent` and `Origin`, only when still absent
//!
//! `Cookie` lines from either list are not treated as ordinary headers.
//! They are collected and merged into one `Cookie` header after the `-b`
//! cookies: `b=2` plus `Cookie: a=1` gives `b=2; a=1`.
//!
//! `Host`, `Upgrade` and `Connection` belong to the handshake itself and
//! are dropped from every source.

use std::fs;
use std::path::Path;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::config::{Config, ConfigError};
use crate::constants::{DEFAULT_USER_AGENT, HEADER_BLACKLIST};

/// Ordered list of `(name, value)` headers.
pub type HeaderList = Vec<(String, String)>;

/// Build the final header list for `url`.
pub fn build_headers(config: &Config, url: &str) -> Result<HeaderList, ConfigError> {
    let file_lines = match &config.headers_file {
        Some(path) => read_header_file(path)?,
        None => Vec::new(),
    };
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let origin = match config.origin.as_deref() {
        Some("") => None,
        Some(origin) => Some(origin.to_string()),
        None => origin_for(url),
    };

    merge_headers(
        &config.headers,
        &file_lines,
        Some(&user_agent),
        origin.as_deref(),
        &config.cookies,
    )
}

/// Merge the header sources in precedence order.
pub fn merge_headers(
    explicit: &[String],
    from_file: &[String],
    user_agent: Option<&str>,
    origin: Option<&str>,
    cookies: &[String],
) -> Result<HeaderList, ConfigError> {
    let mut result = HeaderList::new();
    let mut cookie_headers = Vec::new();

    for (line, overrides) in explicit
        .iter()
        .map(|l| (l, true))
        .chain(from_file.iter().map(|l| (l, false)))
    {
        let (name, value) = parse_header_line(line)?;
        if is_blacklisted(&name) {
            log::debug!("Dropping handshake header {name}");
            continue;
        }
        if name.eq_ignore_ascii_case("cookie") {
            cookie_headers.push(value);
            continue;
        }
        match result.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            // A repeated -H line replaces the earlier one; file lines never do.
            Some(existing) if overrides => existing.1 = value,
            Some(_) => {}
            None => result.push((name, value)),
        }
    }

    if let Some(agent) = user_agent {
        if !contains(&result, "User-Agent") {
            result.push(("User-Agent".to_string(), agent.to_string()));
        }
    }
    if let Some(origin) = origin {
        if !contains(&result, "Origin") {
            result.push(("Origin".to_string(), origin.to_string()));
        }
    }

    let merged: Vec<&str> = cookies
        .iter()
        .map(String::as_str)
        .chain(cookie_headers.iter().map(String::as_str))
        .filter(|c| !c.is_empty())
        .collect();
    if !merged.is_empty() {
        result.push(("Cookie".to_string(), merged.join("; ")));
    }

    Ok(result)
}

/// Split a `Name: value` line, trimming both parts.
pub fn parse_header_line(line: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedHeader(line.to_string()))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ConfigError::MalformedHeader(line.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Origin a browser would send for `url`.
#[must_use]
pub fn origin_for(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    let host = uri.host()?;
    let scheme = if uri.scheme_str() == Some("wss") {
        "https"
    } else {
        "http"
    };
    Some(format!("{scheme}://{host}"))
}

fn read_header_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::HeadersFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn is_blacklisted(name: &str) -> bool {
    HEADER_BLACKLIST
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(name))
}

fn contains(headers: &HeaderList, name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn get<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_cookie_merge_order() {
        let headers =
            merge_headers(&lines(&["Cookie: a=1"]), &[], None, None, &lines(&["b=2"])).unwrap();
        assert_eq!(get(&headers, "Cookie"), Some("b=2; a=1"));
        assert_eq!(headers.iter().filter(|(n, _)| n == "Cookie").count(), 1);
    }

    #[test]
    fn test_cookie_header_without_cookie_flags_is_kept() {
        let headers = merge_headers(&lines(&["cookie: a=1"]), &[], None, None, &[]).unwrap();
        assert_eq!(get(&headers, "Cookie"), Some("a=1"));
    }

    #[test]
    fn test_cookies_from_file_follow_explicit_ones() {
        let headers = merge_headers(
            &lines(&["Cookie: a=1"]),
            &lines(&["Cookie: c=3"]),
            None,
            None,
            &lines(&["b=2"]),
        )
        .unwrap();
        assert_eq!(get(&headers, "Cookie"), Some("b=2; a=1; c=3"));
    }

    #[test]
    fn test_explicit_wins_over_file_wins_over_generated() {
        let headers = merge_headers(
            &lines(&["X-Token: cli"]),
            &lines(&["X-Token: file", "User-Agent: file-agent", "X-Extra: 1"]),
            Some("generated-agent"),
            Some("http://origin"),
            &[],
        )
        .unwrap();
        assert_eq!(get(&headers, "X-Token"), Some("cli"));
        assert_eq!(get(&headers, "User-Agent"), Some("file-agent"));
        assert_eq!(get(&headers, "X-Extra"), Some("1"));
        assert_eq!(get(&headers, "Origin"), Some("http://origin"));
    }

    #[test]
    fn test_blacklist_is_case_insensitive() {
        let headers = merge_headers(
            &lines(&["Host: evil", "upgrade: no", "CONNECTION: close", "X-Ok: yes"]),
            &lines(&["Host: also-evil"]),
            None,
            None,
            &[],
        )
        .unwrap();
        assert_eq!(headers, vec![("X-Ok".to_string(), "yes".to_string())]);
    }

    #[test]
    fn test_malformed_header_is_config_error() {
        let err = merge_headers(&lines(&["NoColonHere"]), &[], None, None, &[]).unwrap_err();
        assert_eq!(err, ConfigError::MalformedHeader("NoColonHere".to_string()));
        assert!(parse_header_line(": value").is_err());
    }

    #[test]
    fn test_header_value_may_contain_colons() {
        let (name, value) = parse_header_line("Referer: https://a.example:8443/x").unwrap();
        assert_eq!(name, "Referer");
        assert_eq!(value, "https://a.example:8443/x");
    }

    #[test]
    fn test_origin_for_url() {
        assert_eq!(
            origin_for("wss://chat.example.com:8443/ws").as_deref(),
            Some("https://chat.example.com")
        );
        assert_eq!(
            origin_for("ws://localhost:9000").as_deref(),
            Some("http://localhost")
        );
    }

    #[test]
    fn test_build_headers_reads_file_and_generates_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "X-From-File: yes").unwrap();
        writeln!(file).unwrap();

        let config = Config {
            headers_file: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        let headers = build_headers(&config, "wss://example.com/ws").unwrap();
        assert_eq!(get(&headers, "X-From-File"), Some("yes"));
        assert_eq!(get(&headers, "User-Agent"), Some(DEFAULT_USER_AGENT));
        assert_eq!(get(&headers, "Origin"), Some("https://example.com"));
    }

    #[test]
    fn test_empty_origin_disables_header() {
        let config = Config {
            origin: Some(String::new()),
            ..Config::default()
        };
        let headers = build_headers(&config, "wss://example.com").unwrap();
        assert_eq!(get(&headers, "Origin"), None);
    }

    #[test]
    fn test_missing_headers_file() {
        let config = Config {
            headers_file: Some("/nonexistent/headers.txt".into()),
            ..Config::default()
        };
        assert!(matches!(
            build_headers(&config, "ws://h"),
            Err(ConfigError::HeadersFile { .. })
        ));
    }
}
