use std::fmt::Write;

pub const ENDPOINT_GLOBAL: &str = "https://app.databend.com";
pub const ENDPOINT_CN: &str = "https://app.databend.cn";
pub const ENDPOINT_ENV: &str = "BENDSQL_API_ENDPOINT";

/// Picks the API endpoint. The environment override wins over the
/// configured value, which wins over the global endpoint.
pub fn resolve_endpoint(env_override: Option<String>, configured: Option<&str>) -> String {
    let chosen = env_override
        .filter(|e| !e.trim().is_empty())
        .or_else(|| configured.filter(|e| !e.trim().is_empty()).map(str::to_string))
        .unwrap_or_else(|| ENDPOINT_GLOBAL.to_string());

    let chosen = chosen.trim().trim_end_matches('/').to_string();

    if chosen.starts_with("http://") || chosen.starts_with("https://") {
        chosen
    } else {
        format!("https://{}", chosen)
    }
}

/// Joins a path onto the endpoint. Absolute URLs (as handed out in
/// continuation pointers) are used unchanged.
pub fn construct_url(endpoint: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let guessed_length = endpoint.len() + path.len() + 1;
    let mut url = String::with_capacity(guessed_length);

    url.push_str(endpoint.trim_end_matches('/'));
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);

    url
}

/// Percent-encodes a single path segment such as a warehouse name.
pub fn encode_segment(input: &str) -> String {
    let mut buffer = String::with_capacity(input.len());
    for b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                buffer.push(*b as char);
            }
            _ => {
                // writing into a String cannot fail
                let _ = write!(buffer, "%{:02X}", b);
            }
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_takes_precedence() {
        let endpoint = resolve_endpoint(
            Some("http://localhost:8080/".into()),
            Some("https://app.databend.cn"),
        );
        assert_eq!(endpoint, "http://localhost:8080");
    }

    #[test]
    fn falls_back_to_configured_then_global() {
        assert_eq!(resolve_endpoint(None, Some(ENDPOINT_CN)), ENDPOINT_CN);
        assert_eq!(resolve_endpoint(Some("  ".into()), None), ENDPOINT_GLOBAL);
        assert_eq!(
            resolve_endpoint(None, Some("app.example.com")),
            "https://app.example.com"
        );
    }

    #[test]
    fn relative_and_absolute_paths() {
        assert_eq!(
            construct_url("https://app.databend.com/", "/v1/query"),
            "https://app.databend.com/v1/query"
        );
        assert_eq!(
            construct_url("https://app.databend.com", "v1/query/abc/page/1"),
            "https://app.databend.com/v1/query/abc/page/1"
        );
        assert_eq!(
            construct_url("https://app.databend.com", "https://gw.databend.com/v1/query/abc"),
            "https://gw.databend.com/v1/query/abc"
        );
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_segment("my wh/1"), "my%20wh%2F1");
        assert_eq!(encode_segment("wh-1_a.b~"), "wh-1_a.b~");
    }
}
