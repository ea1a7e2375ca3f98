use url::Url;

/// Normalized netloc for a URL: lowercased host with any `www.` prefix
/// removed, keeping an explicit `:port` so the same host on different ports
/// counts as different locations. A missing scheme defaults to https so
/// bare hosts still parse.
pub fn url_to_netloc(url: &str) -> String {
    let parsed = Url::parse(url)
        .or_else(|_| Url::parse(&format!("https://{url}")))
        .ok();
    let (host, port) = match &parsed {
        Some(parsed) => (parsed.host_str().unwrap_or(url), parsed.port()),
        None => (url, None),
    };
    let host = host.to_lowercase();
    let host = match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    };
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::url_to_netloc;

    #[test]
    fn strips_scheme_and_www() {
        assert_eq!(url_to_netloc("https://www.example.com/feed"), "example.com");
        assert_eq!(url_to_netloc("http://Example.COM/x"), "example.com");
        assert_eq!(url_to_netloc("example.com/feed.xml"), "example.com");
    }

    #[test]
    fn keeps_explicit_ports_apart() {
        assert_eq!(
            url_to_netloc("http://example.com:8080/a"),
            "example.com:8080"
        );
        assert_eq!(
            url_to_netloc("http://example.com:9090/b"),
            "example.com:9090"
        );
        // Scheme-default ports are not explicit.
        assert_eq!(url_to_netloc("http://example.com:80/a"), "example.com");
    }
}
