//! Request context and cheap routing classification.
//!
//! [`RequestContext`] is the crate's view of an inbound request: the
//! fields the inspection pipeline reads, nothing more. The routing
//! helpers are stateless predicates used to decide whether a request
//! should enter the pipeline at all.

use std::collections::HashMap;

/// Session cookie set by the dashboard after login. Only presence is
/// recorded; the value is never decoded here.
pub const SESSION_COOKIE: &str = "productos_session";

/// Refresh-token cookie. Presence only, never decoded.
pub const REFRESH_COOKIE: &str = "productos_refresh";

/// Locales served by the dashboard; bare paths redirect to the first.
const SUPPORTED_LOCALES: [&str; 2] = ["es", "en"];

/// Context for one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request headers (lowercase keys).
    pub headers: HashMap<String, Vec<String>>,
    /// Best available client IP, or "unknown".
    pub client_ip: String,
    /// Request path, without the query string.
    pub path: String,
    /// HTTP method, uppercase.
    pub method: String,
    /// Value of the Host header, or empty.
    pub host: String,
    /// Forwarded protocol, defaulting to "http".
    pub protocol: String,
    /// Raw query string, if any.
    pub query: Option<String>,
}

impl RequestContext {
    /// Build a context from request parts. Header keys are lowercased
    /// here so lookups elsewhere never have to care about casing.
    pub fn from_parts(
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: HashMap<String, Vec<String>>,
    ) -> Self {
        let headers: HashMap<String, Vec<String>> = headers
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        let client_ip = extract_client_ip(&headers);
        let host = first_header(&headers, "host").unwrap_or_default().to_string();
        let protocol = first_header(&headers, "x-forwarded-proto")
            .unwrap_or("http")
            .to_string();

        Self {
            headers,
            client_ip,
            path: path.to_string(),
            method: method.to_uppercase(),
            host,
            protocol,
            query: query.map(|q| q.to_string()),
        }
    }

    /// Get a single header value (first if multiple).
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, &name.to_lowercase())
    }

    /// Get the User-Agent header.
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Whether a named cookie is present in the Cookie header.
    pub fn has_cookie(&self, name: &str) -> bool {
        let Some(cookies) = self.header("cookie") else {
            return false;
        };
        cookies.split(';').any(|pair| {
            pair.trim()
                .split_once('=')
                .map(|(k, _)| k == name)
                .unwrap_or(false)
        })
    }

    /// Presence of the dashboard session cookie.
    pub fn has_session_cookie(&self) -> bool {
        self.has_cookie(SESSION_COOKIE)
    }

    /// Presence of the refresh-token cookie.
    pub fn has_refresh_cookie(&self) -> bool {
        self.has_cookie(REFRESH_COOKIE)
    }
}

fn first_header<'a>(headers: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.first()).map(|s| s.as_str())
}

/// Extract the best available client IP from forwarded headers.
///
/// Prefers the first entry of `x-forwarded-for`, then `x-real-ip`.
pub fn extract_client_ip(headers: &HashMap<String, Vec<String>>) -> String {
    if let Some(forwarded) = first_header(headers, "x-forwarded-for") {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() && ip != "unknown" {
                return ip.to_string();
            }
        }
    }
    if let Some(real) = first_header(headers, "x-real-ip") {
        let real = real.trim();
        if !real.is_empty() && real != "unknown" {
            return real.to_string();
        }
    }
    "unknown".to_string()
}

/// Paths the inspection pipeline never runs on: framework internals,
/// static assets, and probes the platform itself answers.
pub fn is_system_path(path: &str) -> bool {
    path.starts_with("/_next/")
        || path.starts_with("/static/")
        || path.starts_with("/assets/")
        || path.starts_with("/.well-known/")
        || path == "/favicon.ico"
        || path == "/robots.txt"
        || path == "/healthz"
}

/// Locale redirect target for bare paths, if one applies.
///
/// The dashboard serves everything under a locale prefix; a path with
/// no recognized prefix redirects to the default locale.
pub fn locale_redirect(path: &str) -> Option<String> {
    if is_system_path(path) || path.starts_with("/api/") {
        return None;
    }
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");
    if SUPPORTED_LOCALES.contains(&first_segment) {
        return None;
    }
    Some(format!("/{}{}", SUPPORTED_LOCALES[0], path))
}

/// Whether a path requires an authenticated session.
pub fn requires_auth(path: &str) -> bool {
    let unlocalized = strip_locale(path);
    unlocalized.starts_with("/dashboard")
        || unlocalized.starts_with("/admin")
        || (unlocalized.starts_with("/api/")
            && !unlocalized.starts_with("/api/auth/")
            && !unlocalized.starts_with("/api/public/"))
}

fn strip_locale(path: &str) -> &str {
    for locale in SUPPORTED_LOCALES {
        let prefix_len = locale.len() + 1;
        if path.len() > prefix_len
            && path.as_bytes()[0] == b'/'
            && path[1..].starts_with(locale)
            && path.as_bytes().get(prefix_len) == Some(&b'/')
        {
            return &path[prefix_len..];
        }
    }
    path
}
