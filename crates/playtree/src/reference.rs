//! Media reference handling: parsing, display, and combination of a
//! relative reference with an inherited base.
//!
//! Absolute references go through the `url` crate. Relative references are
//! kept as opaque path/query/fragment triples, because combination below is
//! not RFC 3986 resolution: the base contributes scheme, credentials, host
//! and port, both sides' query and fragment are dropped, and paths are
//! spliced after the base path's last `/`.

use std::fmt;

use url::Url;

use crate::error::{PlaytreeError, PlaytreeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    scheme: Option<String>,
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    query: Option<String>,
    fragment: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn looks_absolute(text: &str) -> bool {
    match text.find("://") {
        Some(idx) if idx > 0 => text[..idx]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.'),
        _ => false,
    }
}

impl Reference {
    /// Parse a textual reference. With `allow_relative` unset, anything
    /// without a scheme is rejected.
    pub fn parse(text: &str, allow_relative: bool) -> PlaytreeResult<Self> {
        if looks_absolute(text) {
            let url = Url::parse(text)?;
            return Ok(Self {
                scheme: Some(url.scheme().to_string()),
                user: non_empty(url.username()),
                password: url.password().map(str::to_string),
                host: url.host_str().map(str::to_string),
                port: url.port(),
                path: non_empty(url.path()),
                query: url.query().map(str::to_string),
                fragment: url.fragment().map(str::to_string),
            });
        }

        if !allow_relative {
            return Err(PlaytreeError::Policy(format!(
                "relative reference not allowed here: {text}"
            )));
        }

        let (rest, fragment) = match text.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (text, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };

        Ok(Self {
            scheme: None,
            user: None,
            password: None,
            host: None,
            port: None,
            path: non_empty(path),
            query,
            fragment,
        })
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Combine this reference with a base. A reference that already carries
    /// a host stands on its own; otherwise scheme, credentials, host and
    /// port are inherited and the paths are spliced. The base's query and
    /// fragment never carry over.
    pub fn combine_with_base(&self, base: &Reference) -> Reference {
        if self.host.is_some() {
            return self.clone();
        }

        let path = match (self.path.as_deref(), base.path.as_deref()) {
            // A root-absolute path wins outright.
            (Some(p), _) if p.starts_with('/') => Some(p.to_string()),
            (current, None) => current.map(str::to_string),
            (current, Some(base_path)) => {
                let current = current.unwrap_or("");
                // The base path matters only up to its last separator; a
                // base path without one gains an implicit trailing slash.
                Some(match base_path.rfind('/') {
                    Some(idx) => format!("{}{}", &base_path[..=idx], current),
                    None => format!("{base_path}/{current}"),
                })
            }
        };

        Reference {
            scheme: base.scheme.clone(),
            user: base.user.clone(),
            password: base.password.clone(),
            host: base.host.clone(),
            port: base.port,
            path,
            query: None,
            fragment: None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            write!(f, "@")?;
        }
        if let Some(host) = &self.host {
            write!(f, "{host}")?;
            if let Some(port) = self.port {
                write!(f, ":{port}")?;
            }
        }
        if let Some(path) = &self.path {
            if self.host.is_some() && !path.starts_with('/') {
                write!(f, "/")?;
            }
            write!(f, "{path}")?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(text: &str) -> Reference {
        Reference::parse(text, true).unwrap()
    }

    #[test]
    fn test_parse_absolute() {
        let r = reference("http://user:pw@host:8080/dir/file?q=1#frag");
        assert_eq!(r.scheme(), Some("http"));
        assert_eq!(r.host(), Some("host"));
        assert_eq!(r.path(), Some("/dir/file"));
        assert_eq!(r.to_string(), "http://user:pw@host:8080/dir/file?q=1#frag");
    }

    #[test]
    fn test_parse_lowercases_scheme() {
        assert_eq!(reference("httP://host/file").scheme(), Some("http"));
    }

    #[test]
    fn test_parse_relative_requires_permission() {
        assert!(Reference::parse("sub/x", false).is_err());
        let r = reference("sub/x");
        assert_eq!(r.scheme(), None);
        assert_eq!(r.path(), Some("sub/x"));
    }

    #[test]
    fn test_combine_splices_after_last_separator() {
        let base = reference("http://h/dir/");
        assert_eq!(
            reference("sub/x").combine_with_base(&base).to_string(),
            "http://h/dir/sub/x"
        );

        let base = reference("http://h/dir");
        assert_eq!(
            reference("x").combine_with_base(&base).to_string(),
            "http://h/x"
        );
    }

    #[test]
    fn test_combine_root_absolute_path_wins() {
        let base = reference("http://h/dir/");
        assert_eq!(
            reference("/top").combine_with_base(&base).to_string(),
            "http://h/top"
        );
    }

    #[test]
    fn test_combine_own_host_ignores_base() {
        let base = reference("http://h/dir/");
        assert_eq!(
            reference("rtsp://other/a").combine_with_base(&base).to_string(),
            "rtsp://other/a"
        );
    }

    #[test]
    fn test_combine_base_without_path() {
        let base = reference("mms://h");
        assert_eq!(
            reference("file").combine_with_base(&base).to_string(),
            "mms://h/file"
        );
    }

    #[test]
    fn test_combine_drops_base_query_and_fragment() {
        let base = reference("http://h/?huh");
        assert_eq!(
            reference("somefile").combine_with_base(&base).to_string(),
            "http://h/somefile"
        );

        let base = reference("http://h/#huh");
        assert_eq!(
            reference("somefile").combine_with_base(&base).to_string(),
            "http://h/somefile"
        );
    }

    #[test]
    fn test_combine_preserves_scheme_and_credentials() {
        let base = reference("mms://user@h:1755/dir/");
        assert_eq!(
            reference("clip").combine_with_base(&base).to_string(),
            "mms://user@h:1755/dir/clip"
        );
    }
}
