use std::collections::BTreeMap;

use crate::config::{Config, Environment, SecurityConfig};

pub const MAX_INPUT_LENGTH: usize = 10_000;

// Content-Security-Policy as an ordered directive → sources map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentSecurityPolicy {
    directives: BTreeMap<String, Vec<String>>,
    upgrade_insecure_requests: bool,
}

impl ContentSecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    // Policy the product ships with. Development additionally allows
    // eval (hot reload) and websocket connections.
    pub fn for_environment(environment: Environment, security: &SecurityConfig) -> Self {
        let mut csp = Self::new()
            .directive("default-src", &["'self'"])
            .directive("script-src", &["'self'", "'unsafe-inline'"])
            .directive("style-src", &["'self'", "'unsafe-inline'", "https://fonts.googleapis.com"])
            .directive("img-src", &["'self'", "data:", "blob:", "https:"])
            .directive("font-src", &["'self'", "https://fonts.gstatic.com"])
            .directive("connect-src", &["'self'"])
            .directive("frame-ancestors", &["'none'"])
            .directive("object-src", &["'none'"])
            .directive("base-uri", &["'self'"])
            .directive("form-action", &["'self'"]);

        csp.add_source("connect-src", &security.api_origin);
        for source in &security.extra_connect_sources {
            csp.add_source("connect-src", source);
        }

        match environment {
            Environment::Development => {
                csp.add_source("script-src", "'unsafe-eval'");
                csp.add_source("connect-src", "ws:");
                csp.add_source("connect-src", "wss:");
            }
            Environment::Production => {
                csp.upgrade_insecure_requests = true;
            }
        }
        csp
    }

    pub fn directive(mut self, name: &str, sources: &[&str]) -> Self {
        for source in sources {
            self.add_source(name, source);
        }
        self
    }

    // Duplicate and empty sources are ignored.
    pub fn add_source(&mut self, name: &str, source: &str) {
        let source = source.trim();
        if source.is_empty() {
            return;
        }
        let sources = self.directives.entry(name.to_string()).or_default();
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }

    pub fn sources(&self, name: &str) -> Option<&[String]> {
        self.directives.get(name).map(Vec::as_slice)
    }

    pub fn upgrade_insecure_requests(mut self, enabled: bool) -> Self {
        self.upgrade_insecure_requests = enabled;
        self
    }

    pub fn to_header_value(&self) -> String {
        let mut parts: Vec<String> = self
            .directives
            .iter()
            .map(|(name, sources)| format!("{} {}", name, sources.join(" ")))
            .collect();
        if self.upgrade_insecure_requests {
            parts.push("upgrade-insecure-requests".to_string());
        }
        parts.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeaders {
    pub csp: ContentSecurityPolicy,
    // None disables Strict-Transport-Security.
    pub hsts_max_age_secs: Option<u64>,
    pub frame_options: String,
    pub referrer_policy: String,
    pub permissions_policy: String,
}

impl SecurityHeaders {
    pub fn from_config(config: &Config) -> Self {
        let hsts = config
            .is_production()
            .then_some(config.security.hsts_max_age_secs);

        Self {
            csp: ContentSecurityPolicy::for_environment(config.environment, &config.security),
            hsts_max_age_secs: hsts,
            frame_options: "DENY".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
            permissions_policy: "camera=(), microphone=(), geolocation=()".to_string(),
        }
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Security-Policy", self.csp.to_header_value())];
        if let Some(max_age) = self.hsts_max_age_secs {
            headers.push((
                "Strict-Transport-Security",
                format!("max-age={}; includeSubDomains; preload", max_age),
            ));
        }
        headers.push(("X-Frame-Options", self.frame_options.clone()));
        headers.push(("X-Content-Type-Options", "nosniff".to_string()));
        headers.push(("Referrer-Policy", self.referrer_policy.clone()));
        headers.push(("Permissions-Policy", self.permissions_policy.clone()));
        headers.push(("X-XSS-Protection", "1; mode=block".to_string()));
        headers
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

// Removes tags and comments. A '>' inside a quoted attribute value does not
// close the tag, and an unclosed tag or comment swallows the rest of the input.
pub fn strip_tags(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < len {
        if chars[i] != '<' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        if chars[i + 1..].starts_with(&['!', '-', '-']) {
            i += 4;
            while i < len && !chars[i..].starts_with(&['-', '-', '>']) {
                i += 1;
            }
            i += 3;
            continue;
        }

        i += 1;
        let mut quote: Option<char> = None;
        while i < len {
            let c = chars[i];
            i += 1;
            match (quote, c) {
                (None, '"' | '\'') => quote = Some(c),
                (Some(open), _) if c == open => quote = None,
                (None, '>') => break,
                _ => {}
            }
        }
    }
    out
}

// None for schemes that can execute script.
pub fn sanitize_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let normalized: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    const BLOCKED: [&str; 3] = ["javascript:", "data:", "vbscript:"];
    if BLOCKED.iter().any(|scheme| normalized.starts_with(scheme)) {
        return None;
    }
    Some(trimmed.to_string())
}

// Trimmed, control characters removed (newlines and tabs kept), bounded.
pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .take(MAX_INPUT_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_policy_allows_eval_and_websockets() {
        let csp = ContentSecurityPolicy::for_environment(
            Environment::Development,
            &SecurityConfig::default(),
        );
        assert!(csp.sources("script-src").unwrap().contains(&"'unsafe-eval'".to_string()));
        assert!(csp.sources("connect-src").unwrap().contains(&"ws:".to_string()));
        assert!(!csp.to_header_value().contains("upgrade-insecure-requests"));
    }

    #[test]
    fn test_production_headers() {
        let config = Config {
            environment: Environment::Production,
            security: SecurityConfig {
                api_origin: "https://api.example.com".into(),
                ..SecurityConfig::default()
            },
            ..Config::default()
        };
        let headers = SecurityHeaders::from_config(&config).headers();
        let get = |name: &str| headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.clone());

        let csp = get("Content-Security-Policy").unwrap();
        assert!(csp.contains("connect-src 'self' https://api.example.com"));
        assert!(csp.contains("frame-ancestors 'none'"));
        assert!(!csp.contains("unsafe-eval"));
        assert!(csp.ends_with("upgrade-insecure-requests"));
        assert_eq!(
            get("Strict-Transport-Security").unwrap(),
            "max-age=31536000; includeSubDomains; preload"
        );
        assert_eq!(get("X-Frame-Options").unwrap(), "DENY");
    }

    #[test]
    fn test_no_hsts_outside_production() {
        let headers = SecurityHeaders::from_config(&Config::default()).headers();
        assert!(headers.iter().all(|(n, _)| *n != "Strict-Transport-Security"));
    }

    #[test]
    fn test_duplicate_sources_ignored() {
        let mut csp = ContentSecurityPolicy::new().directive("img-src", &["'self'", "'self'"]);
        csp.add_source("img-src", " ");
        assert_eq!(csp.to_header_value(), "img-src 'self'");
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(escape_html("<b>\"hi\"</b>"), "&lt;b&gt;&quot;hi&quot;&lt;&#x2F;b&gt;");
        assert_eq!(strip_tags("<p>Hello <em>there</em></p>"), "Hello there");
        assert_eq!(sanitize_url(" JavaScript:alert(1)"), None);
        assert_eq!(sanitize_url("java\tscript:alert(1)"), None);
        assert_eq!(
            sanitize_url("https://example.com/a").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(sanitize_input("  a\u{0}b\nc  "), "ab\nc");
        assert_eq!(sanitize_input(&"x".repeat(MAX_INPUT_LENGTH + 5)).len(), MAX_INPUT_LENGTH);
    }

    #[test]
    fn test_strip_tags_quoted_attributes() {
        assert_eq!(strip_tags(r#"<a title="x>y">Link</a>"#), "Link");
        assert_eq!(strip_tags("<a title='x>y'>Link</a>"), "Link");
        assert_eq!(strip_tags(r#"<a title="it's">ok</a>"#), "ok");
    }

    #[test]
    fn test_strip_tags_comments() {
        assert_eq!(strip_tags("Hello<!-- comment -->World"), "HelloWorld");
        assert_eq!(strip_tags("Hello<!-- a > b -->World"), "HelloWorld");
        assert_eq!(strip_tags("Hello<!-- never closed"), "Hello");
    }

    #[test]
    fn test_strip_tags_unclosed() {
        assert_eq!(strip_tags("Hello<br"), "Hello");
        assert_eq!(strip_tags("Hello<"), "Hello");
        assert_eq!(strip_tags("Line<br/>break"), "Linebreak");
        assert_eq!(strip_tags("1 > 0"), "1 > 0");
    }
}
