//! Response-header hardening middleware.
//!
//! Compiles the default security/caching header set and the
//! Content-Security-Policy once at startup, then stamps every response.
//! Per-request variations (legacy browsers, static assets) are computed
//! from the request alone; nothing is mutated across requests.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderName, HeaderValue, Request,
        header::{self, InvalidHeaderName, InvalidHeaderValue},
    },
    middleware::Next,
    response::Response,
};
use metrics::counter;
use thiserror::Error;
use time::{
    Duration, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description,
};
use tracing::debug;

use crate::config::SecuritySettings;

const CSP_SCRIPT_SRC: &str = "script-src";

/// Script sources every deployment must allow: the page itself, the hash
/// of the inline bootstrap script that toggles the `js-enabled` body
/// class, and the analytics origins.
const REQUIRED_SCRIPT_SOURCES: [&str; 4] = [
    "'self'",
    "'sha256-+6WnXIl4mbFTCARd8N3COQmT3bJJmo32N8q8ZSQAIcU='",
    "https://www.google-analytics.com/",
    "https://www.googletagmanager.com/",
];

const STATIC_ASSET_EXTENSIONS: [&str; 11] = [
    "js", "jpg", "jpeg", "css", "png", "svg", "woff", "woff2", "eot", "ttf", "otf",
];

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid suppressed header name `{name}`: {source}")]
    SuppressedHeaderName {
        name: String,
        source: InvalidHeaderName,
    },
    #[error("compiled Content-Security-Policy is not a valid header value: {source}")]
    CspValue { source: InvalidHeaderValue },
}

/// The compiled response-header policy.
///
/// `baseline` is the ordered header set written to every response before
/// per-request adjustments; `suppressed` headers are never written.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    baseline: Vec<(HeaderName, HeaderValue)>,
    suppressed: Vec<HeaderName>,
}

/// Per-request facts the policy branches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestProfile {
    pub legacy_browser: bool,
    pub static_asset: bool,
}

impl RequestProfile {
    pub fn classify(user_agent: Option<&str>, path: &str) -> Self {
        Self {
            legacy_browser: user_agent.is_some_and(is_legacy_browser),
            static_asset: is_static_asset(path),
        }
    }
}

impl HeaderPolicy {
    /// Compile the policy from configuration.
    ///
    /// Malformed CSP *content* degrades to defaults upstream (absent
    /// sections deserialize empty); only values that cannot be carried in
    /// an HTTP header at all are rejected here, at startup.
    pub fn from_settings(security: &SecuritySettings) -> Result<Self, PolicyError> {
        let csp = compile_csp(&security.csp);
        let csp_value =
            HeaderValue::from_str(&csp).map_err(|source| PolicyError::CspValue { source })?;

        let baseline = vec![
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("1; mode=block"),
            ),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate, private"),
            ),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
            (header::CONTENT_SECURITY_POLICY, csp_value),
        ];

        let mut suppressed = Vec::new();
        for name in &security.disabled_headers {
            let parsed = HeaderName::try_from(name.as_str()).map_err(|source| {
                PolicyError::SuppressedHeaderName {
                    name: name.clone(),
                    source,
                }
            })?;
            if !suppressed.contains(&parsed) {
                suppressed.push(parsed);
            }
        }

        Ok(Self {
            baseline,
            suppressed,
        })
    }

    /// The ordered header set for one request. Pure: derived entirely from
    /// the compiled baseline, the request profile, and the supplied clock.
    pub fn headers_for(
        &self,
        profile: RequestProfile,
        now: OffsetDateTime,
    ) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers = Vec::with_capacity(self.baseline.len());
        for (name, value) in &self.baseline {
            if self.suppressed.contains(name) {
                continue;
            }

            // X-XSS-Protection triggers a vulnerability in IE8 itself, so
            // switch it off for that browser.
            let value = if profile.legacy_browser && *name == header::X_XSS_PROTECTION {
                HeaderValue::from_static("0")
            } else if profile.static_asset && *name == header::CACHE_CONTROL {
                HeaderValue::from_static("public")
            } else if profile.static_asset && *name == header::PRAGMA {
                HeaderValue::from_static("cache")
            } else if profile.static_asset && *name == header::EXPIRES {
                http_date(now + Duration::days(1)).unwrap_or_else(|| value.clone())
            } else {
                value.clone()
            };

            headers.push((name.clone(), value));
        }
        headers
    }

    /// The baseline header set with suppression applied, for inspection.
    pub fn baseline(&self) -> Vec<(HeaderName, HeaderValue)> {
        self.headers_for(RequestProfile::default(), OffsetDateTime::now_utc())
    }
}

/// Stamp the policy headers onto every response.
///
/// Also strips headers that fingerprint the stack or re-enable entity-tag
/// caching; static asset handlers opt back into caching through the
/// policy's static-asset branch, not their own headers.
pub async fn apply_response_headers(
    State(policy): State<Arc<HeaderPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let profile = RequestProfile::classify(user_agent, request.uri().path());

    if profile.legacy_browser {
        counter!("formwork_headers_legacy_browser_total").increment(1);
    }
    if profile.static_asset {
        counter!("formwork_headers_static_asset_total").increment(1);
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.remove(header::ETAG);
    headers.remove(header::SERVER);
    headers.remove(HeaderName::from_static("x-powered-by"));

    for (name, value) in policy.headers_for(profile, OffsetDateTime::now_utc()) {
        headers.insert(name, value);
    }

    response
}

/// Merge configured CSP directives with the mandatory script sources and
/// serialize to a single header value.
fn compile_csp(configured: &BTreeMap<String, Vec<String>>) -> String {
    let mut directives = if configured.is_empty() {
        let mut defaults = BTreeMap::new();
        defaults.insert(CSP_SCRIPT_SRC.to_string(), Vec::new());
        defaults
    } else {
        configured.clone()
    };

    let script_src = directives.entry(CSP_SCRIPT_SRC.to_string()).or_default();
    for source in REQUIRED_SCRIPT_SOURCES {
        if !script_src.iter().any(|existing| existing == source) {
            script_src.push(source.to_string());
        }
    }

    directives
        .iter()
        .map(|(directive, sources)| {
            if sources.is_empty() {
                directive.clone()
            } else {
                format!("{directive} {}", sources.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Matches the `MSIE 8` user-agent marker, any amount of whitespace
/// between token and version, case-insensitive.
fn is_legacy_browser(user_agent: &str) -> bool {
    let bytes = user_agent.as_bytes();
    if bytes.len() < 4 {
        return false;
    }
    for start in 0..=bytes.len() - 4 {
        if !bytes[start..start + 4].eq_ignore_ascii_case(b"msie") {
            continue;
        }
        let mut cursor = start + 4;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor < bytes.len() && bytes[cursor] == b'8' {
            return true;
        }
    }
    false
}

fn is_static_asset(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let Some((_, extension)) = path.rsplit_once('.') else {
        return false;
    };
    if extension.contains('/') {
        return false;
    }
    STATIC_ASSET_EXTENSIONS
        .iter()
        .any(|known| extension.eq_ignore_ascii_case(known))
}

fn http_date(at: OffsetDateTime) -> Option<HeaderValue> {
    let formatted = match at.format(HTTP_DATE) {
        Ok(formatted) => formatted,
        Err(error) => {
            debug!(error = %error, "failed to format Expires header");
            return None;
        }
    };
    HeaderValue::from_str(&formatted).ok()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::config::SecuritySettings;

    fn policy(settings: &SecuritySettings) -> HeaderPolicy {
        HeaderPolicy::from_settings(settings).expect("valid policy")
    }

    fn header_value<'a>(
        headers: &'a [(HeaderName, HeaderValue)],
        name: &HeaderName,
    ) -> Option<&'a str> {
        headers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value.to_str().expect("ascii header value"))
    }

    #[test]
    fn empty_configuration_yields_script_src_only_policy() {
        let policy = policy(&SecuritySettings::default());
        let headers = policy.headers_for(RequestProfile::default(), OffsetDateTime::now_utc());

        let csp = header_value(&headers, &header::CONTENT_SECURITY_POLICY).expect("csp present");
        assert_eq!(
            csp,
            "script-src 'self' \
             'sha256-+6WnXIl4mbFTCARd8N3COQmT3bJJmo32N8q8ZSQAIcU=' \
             https://www.google-analytics.com/ \
             https://www.googletagmanager.com/"
        );
    }

    #[test]
    fn mandatory_script_sources_appear_exactly_once() {
        let mut settings = SecuritySettings::default();
        settings.csp.insert(
            "script-src".to_string(),
            vec![
                "'self'".to_string(),
                "https://cdn.example.com/".to_string(),
            ],
        );
        settings.csp.insert(
            "default-src".to_string(),
            vec!["'none'".to_string()],
        );

        let policy = policy(&settings);
        let headers = policy.headers_for(RequestProfile::default(), OffsetDateTime::now_utc());
        let csp = header_value(&headers, &header::CONTENT_SECURITY_POLICY).expect("csp present");

        for source in REQUIRED_SCRIPT_SOURCES {
            assert_eq!(csp.matches(source).count(), 1, "source {source}");
        }
        assert!(csp.contains("default-src 'none'"));
        assert!(csp.contains("https://cdn.example.com/"));
    }

    #[test]
    fn configured_directives_without_script_src_still_gain_it() {
        let mut settings = SecuritySettings::default();
        settings
            .csp
            .insert("style-src".to_string(), vec!["'self'".to_string()]);

        let policy = policy(&settings);
        let headers = policy.headers_for(RequestProfile::default(), OffsetDateTime::now_utc());
        let csp = header_value(&headers, &header::CONTENT_SECURITY_POLICY).expect("csp present");

        assert!(csp.contains("script-src 'self'"));
        assert!(csp.contains("style-src 'self'"));
    }

    #[test]
    fn legacy_browser_disables_xss_protection() {
        let policy = policy(&SecuritySettings::default());
        let profile = RequestProfile {
            legacy_browser: true,
            static_asset: false,
        };
        let headers = policy.headers_for(profile, OffsetDateTime::now_utc());

        assert_eq!(
            header_value(&headers, &header::X_XSS_PROTECTION),
            Some("0")
        );
    }

    #[test]
    fn static_assets_switch_to_public_caching() {
        let policy = policy(&SecuritySettings::default());
        let profile = RequestProfile {
            legacy_browser: false,
            static_asset: true,
        };
        let now = datetime!(2026-03-01 12:00:00 UTC);
        let headers = policy.headers_for(profile, now);

        assert_eq!(header_value(&headers, &header::CACHE_CONTROL), Some("public"));
        assert_eq!(header_value(&headers, &header::PRAGMA), Some("cache"));
        assert_eq!(
            header_value(&headers, &header::EXPIRES),
            Some("Mon, 02 Mar 2026 12:00:00 GMT")
        );
    }

    #[test]
    fn suppressed_headers_are_never_emitted() {
        let settings = SecuritySettings {
            disabled_headers: vec!["X-Frame-Options".to_string(), "pragma".to_string()],
            ..Default::default()
        };
        let policy = policy(&settings);
        let headers = policy.headers_for(RequestProfile::default(), OffsetDateTime::now_utc());

        assert!(header_value(&headers, &header::X_FRAME_OPTIONS).is_none());
        assert!(header_value(&headers, &header::PRAGMA).is_none());
        assert!(header_value(&headers, &header::X_CONTENT_TYPE_OPTIONS).is_some());
    }

    #[test]
    fn invalid_suppressed_header_name_is_rejected() {
        let settings = SecuritySettings {
            disabled_headers: vec!["not a header".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            HeaderPolicy::from_settings(&settings),
            Err(PolicyError::SuppressedHeaderName { .. })
        ));
    }

    #[test]
    fn legacy_browser_detection_tolerates_spacing_and_case() {
        assert!(is_legacy_browser(
            "Mozilla/4.0 (compatible; MSIE 8.0; Windows NT 6.1)"
        ));
        assert!(is_legacy_browser("mozilla msie8.0"));
        assert!(is_legacy_browser("MSIE  8"));
        assert!(!is_legacy_browser(
            "Mozilla/4.0 (compatible; MSIE 9.0; Windows NT 6.1)"
        ));
        assert!(!is_legacy_browser("Mozilla/5.0 Firefox/119.0"));
    }

    #[test]
    fn static_asset_detection_covers_known_extensions() {
        assert!(is_static_asset("/static/app.js"));
        assert!(is_static_asset("/static/app.JS"));
        assert!(is_static_asset("/img/logo.jpeg"));
        assert!(is_static_asset("/fonts/brand.woff2"));
        assert!(is_static_asset("/static/app.css?v=3"));
        assert!(!is_static_asset("/start"));
        assert!(!is_static_asset("/report.pdf"));
        assert!(!is_static_asset("/v1.2/start"));
    }
}
