//! Markup knowledge needed by the session core.
//!
//! [`PageInspector`] is the seam to the HTML-scraping side of the tool: the
//! core only asks "who is logged in", "is this an anonymous page", "where is
//! the anti-forgery token" and "did the site reject the password". Swap the
//! implementation when the site's markup changes.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

pub trait PageInspector: Send + Sync {
    /// Handle of the logged-in user, if the page shows one.
    fn logged_in_handle(&self, body: &str) -> Option<String>;

    /// True when the page carries an explicit logged-out marker.
    fn is_anonymous(&self, body: &str) -> bool;

    /// Anti-forgery token embedded in the login form.
    fn csrf_token(&self, body: &str) -> Option<String>;

    /// Error message shown after a rejected login, if any.
    fn login_error(&self, body: &str) -> Option<String>;
}

static HANDLE_RE: Lazy<Regex> = Lazy::new(|| build_regex(r#"handle = "([^"]+)""#));
static ANONYMOUS_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"href="/(?:enter|register)(?:[?"])"#));

static CSRF_INPUT: Lazy<Selector> = Lazy::new(|| build_selector(r#"input[name="csrf_token"]"#));
static CSRF_META: Lazy<Selector> = Lazy::new(|| build_selector(r#"meta[name="X-Csrf-Token"]"#));
static CSRF_SPAN: Lazy<Selector> = Lazy::new(|| build_selector("span.csrf-token[data-csrf]"));
static LOGIN_ERROR: Lazy<Selector> = Lazy::new(|| build_selector("span.error.for__password"));

/// Markers of the Codeforces page layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeforcesPages;

impl CodeforcesPages {
    pub fn new() -> Self {
        Self
    }
}

impl PageInspector for CodeforcesPages {
    fn logged_in_handle(&self, body: &str) -> Option<String> {
        HANDLE_RE
            .captures(body)
            .and_then(|captures| captures.get(1))
            .map(|handle| handle.as_str().trim().to_string())
            .filter(|handle| !handle.is_empty())
    }

    fn is_anonymous(&self, body: &str) -> bool {
        ANONYMOUS_RE.is_match(body)
    }

    fn csrf_token(&self, body: &str) -> Option<String> {
        let document = Html::parse_document(body);
        let candidates = [
            (&*CSRF_INPUT, "value"),
            (&*CSRF_META, "content"),
            (&*CSRF_SPAN, "data-csrf"),
        ];
        candidates.iter().find_map(|(selector, attribute)| {
            document
                .select(selector)
                .filter_map(|element| element.value().attr(attribute))
                .map(str::trim)
                .find(|token| !token.is_empty())
                .map(str::to_string)
        })
    }

    fn login_error(&self, body: &str) -> Option<String> {
        let document = Html::parse_document(body);
        document
            .select(&LOGIN_ERROR)
            .map(|element| element.text().collect::<String>().trim().to_string())
            .find(|message| !message.is_empty())
    }
}

fn build_regex(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|err| panic!("invalid page marker regex `{}`: {}", pattern, err))
}

fn build_selector(selector: &str) -> Selector {
    Selector::parse(selector)
        .unwrap_or_else(|err| panic!("invalid page selector `{}`: {:?}", selector, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><head><meta name="X-Csrf-Token" content="meta-token"/></head>
        <body>
            <a href="/enter?back=%2F">Enter</a>
            <form method="post" action="" id="enterForm">
                <input type='hidden' name='csrf_token' value='f00dfeedf00dfeed'/>
                <input type="hidden" name="action" value="enter"/>
                <span class="error for__password">Invalid handle/email or password</span>
            </form>
        </body></html>
    "#;

    #[test]
    fn extracts_csrf_from_form_input_first() {
        assert_eq!(
            CodeforcesPages.csrf_token(LOGIN_PAGE),
            Some("f00dfeedf00dfeed".to_string())
        );
    }

    #[test]
    fn falls_back_to_meta_and_span_tokens() {
        let meta_only = r#"<meta name="X-Csrf-Token" content="from-meta"/>"#;
        assert_eq!(CodeforcesPages.csrf_token(meta_only), Some("from-meta".into()));

        let span_only = r#"<span class="csrf-token" data-csrf="from-span">&nbsp;</span>"#;
        assert_eq!(CodeforcesPages.csrf_token(span_only), Some("from-span".into()));

        assert_eq!(CodeforcesPages.csrf_token("<html></html>"), None);
    }

    #[test]
    fn reads_login_error() {
        assert_eq!(
            CodeforcesPages.login_error(LOGIN_PAGE),
            Some("Invalid handle/email or password".to_string())
        );
        assert_eq!(CodeforcesPages.login_error("<p>welcome</p>"), None);
    }

    #[test]
    fn handle_marker() {
        assert_eq!(
            CodeforcesPages.logged_in_handle(r#"var handle = "jiangly";"#),
            Some("jiangly".into())
        );
        assert_eq!(CodeforcesPages.logged_in_handle(r#"var handle = "";"#), None);
        assert!(CodeforcesPages.is_anonymous(LOGIN_PAGE));
        assert!(!CodeforcesPages.is_anonymous(r#"<a href="/enterprise">x</a>"#));
    }
}
