//! Location normalization
//!
//! The backend answers with either an absolute URL on its own host or a
//! relative path. Both are reduced to a canonical root-relative path before
//! they are stored, and re-hosted on the relay's base URL when returned to a
//! caller. Keeping the two steps apart means the base URL can change without
//! rewriting history.

use thiserror::Error;
use url::Url;

/// Location errors
#[derive(Error, Debug)]
pub enum LocationError {
    #[error("Cannot resolve '{path}' against base URL: {source}")]
    Join {
        path: String,
        #[source]
        source: url::ParseError,
    },
}

/// Reduce a backend location to a canonical root-relative path.
///
/// Absolute `http`/`https` URLs keep only their path, query and fragment.
/// Their path comes back in the parser's form: dot segments resolved and
/// unsafe characters percent-encoded.
/// The result always starts with exactly one `/`.
pub fn normalize(location: &str) -> String {
    let location = location.trim();

    let relative = if is_absolute_http(location) {
        match Url::parse(location) {
            Ok(parsed) => {
                let mut path = parsed.path().to_string();
                // An empty query or fragment leaves no trailing `?` or `#`.
                if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
                    path.push('?');
                    path.push_str(query);
                }
                if let Some(fragment) = parsed.fragment().filter(|f| !f.is_empty()) {
                    path.push('#');
                    path.push_str(fragment);
                }
                path
            }
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "Unparseable backend location kept as given");
                location.to_string()
            }
        }
    } else {
        location.to_string()
    };

    // A leading "//" would read as a scheme-relative reference to another host.
    format!("/{}", relative.trim_start_matches('/'))
}

/// Whether a stored location is already a canonical root-relative path
pub fn is_canonical(location: &str) -> bool {
    location.starts_with('/')
}

fn is_absolute_http(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolves canonical paths against the configured public base URL
#[derive(Debug, Clone)]
pub struct PublicUrlBuilder {
    base: Url,
}

impl PublicUrlBuilder {
    /// Create a builder for the given base URL
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// The configured base URL
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Join a canonical path onto the base URL.
    ///
    /// Follows relative-reference resolution: the path replaces the base
    /// URL's path rather than being appended to it.
    pub fn to_public(&self, canonical_path: &str) -> Result<String, LocationError> {
        let path = normalize_leading_slashes(canonical_path);
        self.base
            .join(&path)
            .map(String::from)
            .map_err(|source| LocationError::Join {
                path: canonical_path.to_string(),
                source,
            })
    }

    /// Public form of a stored history location.
    ///
    /// Root-relative paths are resolved against the base URL. Anything else
    /// is a legacy full URL and is returned untouched.
    pub fn resolve_stored(&self, stored: &str) -> Result<String, LocationError> {
        if is_canonical(stored) {
            self.to_public(stored)
        } else {
            Ok(stored.to_string())
        }
    }
}

fn normalize_leading_slashes(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
