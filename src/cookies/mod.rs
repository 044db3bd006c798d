//! Domain/path scoped cookie jar shared by every outbound request.
//!
//! The jar is the live mirror of the `cookies` field of the persisted
//! session. It plugs into reqwest through [`reqwest::cookie::CookieStore`], so
//! cookies set by the server are attached to later requests automatically,
//! and it can be converted to and from a flat list of [`CookieRecord`]s at the
//! persistence boundary.
//!
//! All reads and writes go through a single mutex; reqwest calls into the jar
//! from whichever task is driving a request.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use url::Url;

/// One persisted cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub domain: String,
    pub path: String,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub host_only: bool,
}

impl CookieRecord {
    fn key(&self) -> CookieKey {
        CookieKey {
            domain: self.domain.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, url: &Url, now: DateTime<Utc>) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.is_expired(now) {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok && path_matches(url.path(), &self.path)
    }
}

/// Identity of a cookie inside the jar. Two records with the same key never
/// coexist; a later `Set-Cookie` replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CookieKey {
    domain: String,
    path: String,
    name: String,
}

/// Thread-safe cookie store.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: Mutex<BTreeMap<CookieKey, CookieRecord>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a jar from persisted records. Duplicate keys collapse to the
    /// last record seen and already-expired cookies are dropped.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = CookieRecord>,
    {
        let now = Utc::now();
        let entries = records
            .into_iter()
            .filter(|record| !record.is_expired(now) && !record.name.is_empty())
            .map(|record| (record.key(), record))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Snapshot of the live cookies, ordered by (domain, path, name).
    pub fn records(&self) -> Vec<CookieRecord> {
        let now = Utc::now();
        self.lock()
            .values()
            .filter(|record| !record.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Apply a raw `Set-Cookie` header value received from `url`.
    pub fn store_set_cookie(&self, raw: &str, url: &Url) {
        let now = Utc::now();
        let mut guard = self.lock();
        apply_set_cookie(&mut guard, raw, url, now);
    }

    /// Value for the `Cookie` request header when talking to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let guard = self.lock();
        let mut matching: Vec<&CookieRecord> = guard
            .values()
            .filter(|record| record.matches(url, now))
            .collect();

        if matching.is_empty() {
            return None;
        }

        // More specific paths go first.
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|record| format!("{}={}", record.name, record.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CookieKey, CookieRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let now = Utc::now();
        let mut guard = self.lock();
        for header in cookie_headers {
            match header.to_str() {
                Ok(raw) => apply_set_cookie(&mut guard, raw, url, now),
                Err(_) => log::debug!("ignoring non-ascii Set-Cookie from {}", url),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.cookie_header(url)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

fn apply_set_cookie(
    entries: &mut BTreeMap<CookieKey, CookieRecord>,
    raw: &str,
    url: &Url,
    now: DateTime<Utc>,
) {
    match parse_set_cookie(raw, url, now) {
        Some(record) if record.is_expired(now) => {
            entries.remove(&record.key());
        }
        Some(record) => {
            entries.insert(record.key(), record);
        }
        None => log::debug!("rejected Set-Cookie for {}", url),
    }
}

/// Parse a `Set-Cookie` header into a record scoped to `url`. Returns `None`
/// for malformed headers and for cookies whose `Domain` attribute does not
/// cover the request host.
fn parse_set_cookie(raw: &str, url: &Url, now: DateTime<Utc>) -> Option<CookieRecord> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut parts = raw.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    let mut domain: Option<String> = None;
    let mut path: Option<String> = None;
    let mut expires: Option<DateTime<Utc>> = None;
    let mut max_age: Option<i64> = None;
    let mut secure = false;
    let mut http_only = false;

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                domain = Some(val.trim_start_matches('.').to_ascii_lowercase());
            }
            "path" if val.starts_with('/') => path = Some(val.to_string()),
            "expires" => expires = parse_cookie_date(val),
            "max-age" => max_age = val.parse().ok(),
            "secure" => secure = true,
            "httponly" => http_only = true,
            _ => {}
        }
    }

    let (domain, host_only) = match domain {
        Some(domain) if domain_matches(&host, &domain) => (domain, false),
        Some(_) => return None,
        None => (host, true),
    };

    let expires = match max_age {
        Some(seconds) if seconds <= 0 => Some(DateTime::<Utc>::MIN_UTC),
        Some(seconds) => Some(
            chrono::Duration::try_seconds(seconds)
                .and_then(|age| now.checked_add_signed(age))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        ),
        None => expires,
    };

    Some(CookieRecord {
        domain,
        path: path.unwrap_or_else(|| default_path(url.path())),
        name: name.to_string(),
        value: value.to_string(),
        expires,
        secure,
        http_only,
        host_only,
    })
}

fn parse_cookie_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Netscape style: "Wed, 21-Oct-2037 07:28:00 GMT"
    NaiveDateTime::parse_from_str(raw, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.parse::<std::net::IpAddr>().is_err()
        && host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn same_key_replaces_previous_value() {
        let jar = CookieJar::new();
        let origin = url("https://codeforces.com/enter");
        jar.store_set_cookie("JSESSIONID=first; Path=/", &origin);
        jar.store_set_cookie("JSESSIONID=second; Path=/", &origin);

        let records = jar.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "second");
    }

    #[test]
    fn host_only_cookie_does_not_leak_to_subdomain() {
        let jar = CookieJar::new();
        jar.store_set_cookie("a=1; Path=/", &url("https://codeforces.com/"));

        assert_eq!(
            jar.cookie_header(&url("https://codeforces.com/contest/1")),
            Some("a=1".to_string())
        );
        assert!(jar.cookie_header(&url("https://m1.codeforces.com/")).is_none());
    }

    #[test]
    fn domain_cookie_covers_subdomains() {
        let jar = CookieJar::new();
        jar.store_set_cookie(
            "39ce7=abc; Domain=.codeforces.com; Path=/",
            &url("https://codeforces.com/"),
        );

        assert_eq!(
            jar.cookie_header(&url("https://m2.codeforces.com/problemset")),
            Some("39ce7=abc".to_string())
        );
    }

    #[test]
    fn foreign_domain_attribute_is_rejected() {
        let jar = CookieJar::new();
        jar.store_set_cookie("evil=1; Domain=example.com", &url("https://codeforces.com/"));
        assert!(jar.is_empty());
    }

    #[test]
    fn secure_cookie_requires_https() {
        let jar = CookieJar::new();
        jar.store_set_cookie("s=1; Path=/; Secure", &url("https://codeforces.com/"));

        assert!(jar.cookie_header(&url("http://codeforces.com/")).is_none());
        assert!(jar.cookie_header(&url("https://codeforces.com/")).is_some());
    }

    #[test]
    fn path_scoping_and_ordering() {
        let jar = CookieJar::new();
        let origin = url("https://codeforces.com/");
        jar.store_set_cookie("root=1; Path=/", &origin);
        jar.store_set_cookie("contest=2; Path=/contest", &origin);

        assert_eq!(
            jar.cookie_header(&url("https://codeforces.com/contest/1/problem/A")),
            Some("contest=2; root=1".to_string())
        );
        assert_eq!(
            jar.cookie_header(&url("https://codeforces.com/contests")),
            Some("root=1".to_string())
        );
    }

    #[test]
    fn max_age_zero_removes_cookie() {
        let jar = CookieJar::new();
        let origin = url("https://codeforces.com/");
        jar.store_set_cookie("JSESSIONID=abc; Path=/", &origin);
        jar.store_set_cookie("JSESSIONID=; Path=/; Max-Age=0", &origin);
        assert!(jar.is_empty());
    }

    #[test]
    fn expires_attribute_is_parsed() {
        let jar = CookieJar::new();
        jar.store_set_cookie(
            "X-User=1; Path=/; Expires=Wed, 21 Oct 2037 07:28:00 GMT",
            &url("https://codeforces.com/"),
        );
        let record = &jar.records()[0];
        assert_eq!(
            record.expires.map(|ts| ts.to_rfc3339()),
            Some("2037-10-21T07:28:00+00:00".to_string())
        );

        jar.store_set_cookie(
            "Y=2; Path=/; expires=Wed, 21-Oct-2037 07:28:00 GMT",
            &url("https://codeforces.com/"),
        );
        assert!(jar.records().iter().all(|record| record.expires.is_some()));
    }

    #[test]
    fn default_path_uses_request_directory() {
        let jar = CookieJar::new();
        jar.store_set_cookie("p=1", &url("https://codeforces.com/contest/1"));
        assert_eq!(jar.records()[0].path, "/contest");
    }

    #[test]
    fn from_records_collapses_duplicates_and_drops_expired() {
        let base = CookieRecord {
            domain: "codeforces.com".into(),
            path: "/".into(),
            name: "a".into(),
            value: "1".into(),
            expires: None,
            secure: false,
            http_only: false,
            host_only: true,
        };
        let mut newer = base.clone();
        newer.value = "2".into();
        let mut stale = base.clone();
        stale.name = "old".into();
        stale.expires = Some(Utc::now() - chrono::Duration::days(1));

        let jar = CookieJar::from_records(vec![base, newer, stale]);
        let records = jar.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "2");
    }

    #[test]
    fn cookie_store_trait_round_trip() {
        let jar = CookieJar::new();
        let origin = url("http://127.0.0.1:8080/enter");
        let header = HeaderValue::from_static("JSESSIONID=xyz; Path=/; HttpOnly");
        jar.set_cookies(&mut std::iter::once(&header), &origin);

        let sent = jar.cookies(&url("http://127.0.0.1:8080/contest/1"));
        assert_eq!(sent, Some(HeaderValue::from_static("JSESSIONID=xyz")));
    }
}
