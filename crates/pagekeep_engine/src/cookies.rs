use serde::{Deserialize, Serialize};
use url::Url;

/// A cookie captured from the caller's authenticated browsing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// Cookie domain; a leading dot is ignored.
    pub domain: String,
}

impl SessionCookie {
    fn bare_domain(&self) -> String {
        self.domain.trim_start_matches('.').to_ascii_lowercase()
    }
}

/// Cookies attached to asset requests of one login-aware capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    cookies: Vec<SessionCookie>,
}

impl SessionCookies {
    pub fn none() -> Self {
        Self::default()
    }

    /// Keep only cookies belonging to the page's host, its parent domains or its subdomains.
    pub fn scoped_to(cookies: Vec<SessionCookie>, page: &Url) -> Self {
        let Some(host) = page.host_str().map(str::to_ascii_lowercase) else {
            return Self::none();
        };
        let cookies = cookies
            .into_iter()
            .filter(|cookie| {
                let domain = cookie.bare_domain();
                !domain.is_empty()
                    && (domain_matches(&host, &domain) || domain_matches(&domain, &host))
            })
            .collect();
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| domain_matches(&host, &cookie.bare_domain()))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

/// RFC 6265 style: `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
