//! Header and address rules shared by the helpdesk fetcher and jobs.
//!
//! Everything here is pure string processing: no I/O, no allocation beyond
//! the returned values, so callers can run it on every incoming message.

use once_cell::sync::Lazy;
use regex::Regex;

static LOCAL_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9!#$%&'*+/=?^_`{|}~.-]+$").unwrap());

static DOMAIN_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap()
});

static REPEATED_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());

/// Header lines marking a message as machine generated.
/// Matching is done line by line against the raw header block.
static AUTO_RESPONDER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^x-autoreply\s*:",
        r"(?im)^x-autorespond\s*:",
        r"(?im)^x-autoresponder\s*:",
        r"(?im)^auto-submitted\s*:\s*auto-replied",
        r"(?im)^precedence\s*:\s*(bulk|junk|list)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BOUNCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^x-failed-recipients\s*:",
        r"(?im)^content-type\s*:\s*multipart/report\s*;[^\n]*report-type\s*=\s*.?delivery-status",
        r"(?im)^from\s*:[^\n]*(mailer-daemon|postmaster)@",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>\s]+)>").unwrap());

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|<[^>]+>").unwrap());

/// Normalise an email address for storage and lookups.
///
/// Besides trimming and lowercasing:
/// - a `Name <addr>` wrapper or `mailto:` prefix is stripped
/// - runs of dots in the local part collapse to one (`a..b@x.com` becomes `a.b@x.com`)
/// - leading and trailing dots of the local part are dropped, so dots right
///   before the `@` go away (`user...@x.com` becomes `user@x.com`)
/// - leading and trailing dots of the domain are dropped
///
/// Returns `None` for anything else that is not a plausible address. The
/// domain needs at least two labels, so `user@localhost` is rejected.
pub fn sanitize_email(email: &str) -> Option<String> {
    let mut email = email.trim();

    if let (Some(start), Some(end)) = (email.rfind('<'), email.rfind('>')) {
        if start < end {
            email = &email[start + 1..end];
        }
    }

    let email = email.trim().to_lowercase();
    let email = email.strip_prefix("mailto:").unwrap_or(&email);

    let (local, domain) = email.split_once('@')?;
    if domain.contains('@') {
        return None;
    }

    let local = REPEATED_DOTS.replace_all(local, ".");
    let local = local.trim_matches('.');
    let domain = domain.trim_matches('.');

    if local.is_empty() || !LOCAL_PART.is_match(local) || !DOMAIN_PART.is_match(domain) {
        return None;
    }

    Some(format!("{}@{}", local, domain))
}

/// Whether the raw header block marks the message as an automatic reply.
pub fn is_auto_responder(headers: &str) -> bool {
    AUTO_RESPONDER_PATTERNS.iter().any(|re| re.is_match(headers))
}

/// Whether the raw header block looks like a delivery status notification.
pub fn is_bounce(headers: &str) -> bool {
    BOUNCE_PATTERNS.iter().any(|re| re.is_match(headers))
}

/// Extract bracketed message ids (`<id@host>`) from a header value such as
/// `References` or `In-Reply-To`, without the brackets.
pub fn extract_message_ids(value: &str) -> Vec<String> {
    let ids: Vec<String> = MESSAGE_ID
        .captures_iter(value)
        .map(|c| c[1].to_string())
        .collect();

    if ids.is_empty() {
        let bare = value.trim();
        if !bare.is_empty() && !bare.contains(char::is_whitespace) {
            return vec![bare.to_string()];
        }
    }
    ids
}

/// Flatten an HTML body to plain text for previews and notifications.
pub fn html_to_text(html: &str) -> String {
    let without_tags = HTML_TAG.replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_lowercases() {
        assert_eq!(
            sanitize_email("Test.User@EXAMPLE.COM").as_deref(),
            Some("test.user@example.com")
        );
    }

    #[test]
    fn test_sanitize_strips_dots_before_at() {
        assert_eq!(
            sanitize_email("user...@example.com").as_deref(),
            Some("user@example.com")
        );
    }

    #[test]
    fn test_sanitize_collapses_and_trims_local_dots() {
        assert_eq!(sanitize_email("a..b@x.com").as_deref(), Some("a.b@x.com"));
        assert_eq!(sanitize_email(".user@example.com").as_deref(), Some("user@example.com"));
        assert_eq!(sanitize_email("user@example.com.").as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_sanitize_rejects_invalid() {
        assert_eq!(sanitize_email("userexample.com"), None);
        assert_eq!(sanitize_email(""), None);
        assert_eq!(sanitize_email("   "), None);
        assert_eq!(sanitize_email("a@b@example.com"), None);
        assert_eq!(sanitize_email("user@localhost"), None);
        assert_eq!(sanitize_email("us er@example.com"), None);
    }

    #[test]
    fn test_sanitize_display_name_wrapper() {
        assert_eq!(
            sanitize_email("\"John Doe\" <John.Doe@Example.org>").as_deref(),
            Some("john.doe@example.org")
        );
        assert_eq!(
            sanitize_email("mailto:Support@Example.org").as_deref(),
            Some("support@example.org")
        );
    }

    #[test]
    fn test_auto_responder_headers() {
        assert!(is_auto_responder("Subject: hi\r\nX-Autoreply: yes\r\n"));
        assert!(is_auto_responder("x-autorespond: 1\r\n"));
        assert!(is_auto_responder("X-AUTORESPONDER: true\r\n"));
        assert!(is_auto_responder("Auto-Submitted: Auto-Replied\r\n"));
        assert!(is_auto_responder("Precedence: bulk\r\n"));
        assert!(is_auto_responder("precedence: JUNK\r\n"));
        assert!(is_auto_responder("Precedence: list\r\n"));
    }

    #[test]
    fn test_auto_responder_absent() {
        assert!(!is_auto_responder("Subject: X-Autoreply: in subject\r\nFrom: a@b.com\r\n"));
        assert!(!is_auto_responder("Auto-Submitted: no\r\n"));
        assert!(!is_auto_responder("Precedence: first-class\r\n"));
        assert!(!is_auto_responder(""));
    }

    #[test]
    fn test_bounce_detection() {
        assert!(is_bounce("From: Mail Delivery System <MAILER-DAEMON@mx.example.com>\r\n"));
        assert!(is_bounce("X-Failed-Recipients: nobody@example.com\r\n"));
        assert!(is_bounce(
            "Content-Type: multipart/report; report-type=delivery-status; boundary=\"x\"\r\n"
        ));
        assert!(!is_bounce("From: customer@example.com\r\nSubject: help\r\n"));
    }

    #[test]
    fn test_extract_message_ids() {
        assert_eq!(
            extract_message_ids("<a@x.com> <b@y.com>"),
            vec!["a@x.com".to_string(), "b@y.com".to_string()]
        );
        assert_eq!(extract_message_ids("bare@id"), vec!["bare@id".to_string()]);
        assert!(extract_message_ids("   ").is_empty());
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello&nbsp;<b>there</b></p>\n<style>p { color: red }</style><p>A &amp; B</p>"),
            "Hello there A & B"
        );
        assert_eq!(html_to_text(""), "");
    }
}
