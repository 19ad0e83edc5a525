//! URL processing and lookup-expression generation for threatdb
//!
//! Threat lists key on hashes of "host+path" expressions derived from a
//! canonicalized URL. A single URL maps to several expressions: the host
//! is checked at multiple subdomain depths and the path at multiple
//! directory depths, so that an entry for `example.com/dir/` covers
//! `a.example.com/dir/page.html?q=1`.

use idna::domain_to_ascii;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Error type for URL operations
#[derive(Debug, Error)]
pub enum UrlError {
    /// Error parsing URL
    #[error("URL parse error: {0}")]
    Parse(#[from] url::ParseError),

    /// Invalid host in URL
    #[error("Invalid host in URL: {0}")]
    InvalidHost(String),

    /// IDNA encoding error
    #[error("IDNA encoding error: {0}")]
    Idna(String),
}

/// Result type for URL operations
pub type Result<T> = std::result::Result<T, UrlError>;

/// Canonicalized components of a URL, ready for expression generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    /// The hostname, lowercased and punycode-encoded
    pub host: String,

    /// The path component, always starting with `/`, without the query
    pub path: String,

    /// The query string, without the leading `?`
    pub query: Option<String>,
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{}{}?{}", self.host, self.path, q),
            None => write!(f, "{}{}", self.host, self.path),
        }
    }
}

/// Canonicalize a parsed URL into the components used for hashing.
///
/// Lowercases the host, converts IDNs to punycode, normalizes an empty
/// path to `/`, and drops the fragment. Ports and schemes do not
/// participate in list expressions.
pub fn canonicalize(url: &Url) -> Result<CanonicalUrl> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain_to_ascii(domain)
            .map_err(|e| UrlError::Idna(e.to_string()))?
            .to_lowercase(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => format!("[{ip}]"),
        None => return Err(UrlError::InvalidHost("No host in URL".to_string())),
    };

    let mut path = url.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }

    Ok(CanonicalUrl {
        host,
        path,
        query: url.query().map(str::to_string),
    })
}

/// Generate the hostnames to check for `host`.
///
/// IP-address hosts are checked verbatim. For domains this is the exact
/// hostname plus up to 4 hostnames formed by taking the last 5
/// components and successively removing the leading component, stopping
/// at two components.
pub fn host_variants(host: &str) -> Vec<String> {
    if host.parse::<IpAddr>().is_ok() || (host.starts_with('[') && host.ends_with(']')) {
        return vec![host.to_string()];
    }

    let components: Vec<&str> = host.split('.').collect();
    let mut variants = vec![host.to_string()];

    // Start from the last 5 components, shrink down to 2.
    let start = components.len().saturating_sub(5).max(1);
    for i in start..components.len().saturating_sub(1) {
        variants.push(components[i..].join("."));
    }

    variants
}

/// Generate the paths to check for `path` and `query`.
///
/// This is the exact path with the query appended, the exact path
/// alone, and up to 4 slash-terminated directory prefixes of the path
/// (the root path counts as the first).
pub fn path_variants(path: &str, query: Option<&str>) -> Vec<String> {
    let mut variants = Vec::new();

    if let Some(q) = query {
        variants.push(format!("{path}?{q}"));
    }
    variants.push(path.to_string());

    let mut prefixes = 0;
    for (i, b) in path.bytes().enumerate() {
        if b != b'/' {
            continue;
        }
        if prefixes == 4 {
            break;
        }
        prefixes += 1;
        let prefix = &path[..=i];
        if prefix != path {
            variants.push(prefix.to_string());
        }
    }

    variants
}

/// Generate every "host+path" expression to check for `url`.
///
/// When `include_whitelist_variants` is set, each expression whose path
/// ends in `/` (other than the bare root) also yields the expression
/// without the trailing slash, so that a whitelisted path prefix `/foo`
/// matches `/foo/bar` and `/foo?bar`.
pub fn browse_expressions(url: &Url, include_whitelist_variants: bool) -> Result<Vec<String>> {
    let canonical = canonicalize(url)?;
    let hosts = host_variants(&canonical.host);
    let paths = path_variants(&canonical.path, canonical.query.as_deref());

    let mut expressions = Vec::with_capacity(hosts.len() * paths.len());
    for host in &hosts {
        for path in &paths {
            expressions.push(format!("{host}{path}"));

            if include_whitelist_variants && path.len() > 1 && path.ends_with('/') {
                expressions.push(format!("{host}{}", &path[..path.len() - 1]));
            }
        }
    }

    debug!(
        url = %url,
        count = expressions.len(),
        "generated lookup expressions"
    );
    Ok(expressions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_canonicalize() {
        let c = canonicalize(&parse("http://Example.Com/path")).unwrap();
        assert_eq!(c.host, "example.com");
        assert_eq!(c.path, "/path");
        assert_eq!(c.query, None);

        let c = canonicalize(&parse("http://example.com/path?q=1#frag")).unwrap();
        assert_eq!(c.path, "/path");
        assert_eq!(c.query.as_deref(), Some("q=1"));

        // IDN hosts come out punycoded.
        let c = canonicalize(&parse("http://例子.测试/")).unwrap();
        assert!(c.host.starts_with("xn--"));
    }

    #[test]
    fn test_host_variants_domain() {
        let variants = host_variants("a.b.c.d.e.f");
        assert_eq!(
            variants,
            vec![
                "a.b.c.d.e.f".to_string(),
                "b.c.d.e.f".to_string(),
                "c.d.e.f".to_string(),
                "d.e.f".to_string(),
                "e.f".to_string(),
            ]
        );

        let variants = host_variants("a.b.c");
        assert_eq!(
            variants,
            vec!["a.b.c".to_string(), "b.c".to_string()]
        );

        assert_eq!(host_variants("example.com"), vec!["example.com".to_string()]);
    }

    #[test]
    fn test_host_variants_ip() {
        assert_eq!(host_variants("192.168.0.1"), vec!["192.168.0.1".to_string()]);
        assert_eq!(host_variants("[2001:db8::1]"), vec!["[2001:db8::1]".to_string()]);
    }

    #[test]
    fn test_path_variants() {
        let variants = path_variants("/1/2.html", Some("param=1"));
        assert_eq!(
            variants,
            vec![
                "/1/2.html?param=1".to_string(),
                "/1/2.html".to_string(),
                "/".to_string(),
                "/1/".to_string(),
            ]
        );

        assert_eq!(path_variants("/", None), vec!["/".to_string()]);

        // A path that ends in a slash does not repeat itself as a prefix.
        let variants = path_variants("/a/b/", None);
        assert_eq!(
            variants,
            vec![
                "/a/b/".to_string(),
                "/".to_string(),
                "/a/".to_string(),
            ]
        );

        // Prefix generation stops after four directory levels.
        let variants = path_variants("/a/b/c/d/e/f.html", None);
        assert!(variants.contains(&"/a/b/c/".to_string()));
        assert!(!variants.contains(&"/a/b/c/d/".to_string()));
    }

    #[test]
    fn test_browse_expressions() {
        let expressions =
            browse_expressions(&parse("http://a.b.c/1/2.html?param=1"), false).unwrap();

        for expected in [
            "a.b.c/1/2.html?param=1",
            "a.b.c/1/2.html",
            "a.b.c/",
            "a.b.c/1/",
            "b.c/1/2.html?param=1",
            "b.c/1/2.html",
            "b.c/",
            "b.c/1/",
        ] {
            assert!(
                expressions.contains(&expected.to_string()),
                "missing {expected} in {expressions:?}"
            );
        }
    }

    #[test]
    fn test_browse_expressions_whitelist_variants() {
        let expressions = browse_expressions(&parse("http://example.com/foo/"), true).unwrap();

        // The trailing-slash expression also appears without the slash.
        assert!(expressions.contains(&"example.com/foo/".to_string()));
        assert!(expressions.contains(&"example.com/foo".to_string()));
        // The bare root never loses its slash.
        assert!(expressions.contains(&"example.com/".to_string()));
        assert!(!expressions.contains(&"example.com".to_string()));
    }

    #[test]
    fn test_browse_expressions_ip_host() {
        let expressions = browse_expressions(&parse("http://192.168.0.1/foo"), false).unwrap();
        assert!(expressions.contains(&"192.168.0.1/foo".to_string()));
        // No subdomain splitting for IP hosts.
        assert!(expressions.iter().all(|e| e.starts_with("192.168.0.1")));
    }
}
