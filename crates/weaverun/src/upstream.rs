//! Upstream URL resolution.

/// Default when no base URL is configured (includes /v1 since SDKs omit it).
pub const DEFAULT_UPSTREAM: &str = "https://api.openai.com/v1";

/// Resolve the upstream URL for a request path.
///
/// Absolute URLs (HTTP-proxy mode) pass through unchanged. Relative paths
/// are joined onto, in order: the user's original `OPENAI_BASE_URL`
/// (preserved by the launcher as `WEAVE_ORIGINAL_OPENAI_BASE_URL`), the
/// explicit `WEAVE_UPSTREAM_BASE` override, or the OpenAI default.
pub fn resolve_upstream(path: &str) -> String {
    resolve_with(
        path,
        env_non_empty("WEAVE_ORIGINAL_OPENAI_BASE_URL").as_deref(),
        env_non_empty("WEAVE_UPSTREAM_BASE").as_deref(),
    )
}

fn resolve_with(path: &str, original: Option<&str>, override_base: Option<&str>) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let base = original.or(override_base).unwrap_or(DEFAULT_UPSTREAM);
    format!("{}/{path}", base.trim_end_matches('/'))
}

/// Extract just the path from a URL, or normalize a bare path.
pub fn extract_path(url_or_path: &str) -> String {
    if let Some(rest) = strip_scheme(url_or_path) {
        return match rest.find('/') {
            Some(idx) => rest[idx..]
                .split('?')
                .next()
                .unwrap_or("/")
                .to_string(),
            None => "/".to_string(),
        };
    }

    if url_or_path.starts_with('/') {
        url_or_path.to_string()
    } else {
        format!("/{url_or_path}")
    }
}

/// Extract the authority (host, with port if present) from an absolute URL.
pub fn extract_host(url: &str) -> String {
    strip_scheme(url)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .to_string()
}

fn strip_scheme(url: &str) -> Option<&str> {
    url.strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_pass_through() {
        let url = "http://localhost:11434/api/chat";
        assert_eq!(resolve_with(url, Some("https://other"), None), url);
    }

    #[test]
    fn original_base_wins_over_override() {
        assert_eq!(
            resolve_with("chat/completions", Some("https://a.example/v1/"), Some("https://b.example")),
            "https://a.example/v1/chat/completions"
        );
    }

    #[test]
    fn override_base_used_when_no_original() {
        assert_eq!(
            resolve_with("chat/completions", None, Some("https://b.example/")),
            "https://b.example/chat/completions"
        );
    }

    #[test]
    fn default_base() {
        assert_eq!(
            resolve_with("chat/completions", None, None),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn extract_path_from_url() {
        assert_eq!(
            extract_path("https://api.openai.com/v1/chat/completions?x=1"),
            "/v1/chat/completions"
        );
        assert_eq!(extract_path("http://localhost:11434"), "/");
        assert_eq!(extract_path("chat/completions"), "/chat/completions");
        assert_eq!(extract_path("/v1/messages"), "/v1/messages");
    }

    #[test]
    fn extract_host_keeps_port() {
        assert_eq!(extract_host("http://localhost:11434/api/chat"), "localhost:11434");
        assert_eq!(extract_host("https://api.openai.com/v1"), "api.openai.com");
        assert_eq!(extract_host("/v1/messages"), "");
    }
}
