//! URL validation for paper links and configured service endpoints.
//!
//! Paper URLs are stored and shown as links, so they only need to be
//! absolute web URLs. Service URLs (the Ollama endpoint) are fetched by the
//! server and are additionally restricted to a bare origin, with an
//! optional path prefix but no query, fragment or credentials.

use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum UrlValidationError {
    /// URL is malformed or cannot be parsed
    InvalidUrl(String),
    /// Scheme other than http/https
    UnsupportedScheme(String),
    /// No host component
    MissingHost,
    /// Query string, fragment or userinfo on a service URL
    UnexpectedComponent(&'static str),
}

impl std::fmt::Display for UrlValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlValidationError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            UrlValidationError::UnsupportedScheme(scheme) => {
                write!(f, "Only http and https URLs are allowed (got {})", scheme)
            }
            UrlValidationError::MissingHost => write!(f, "URL has no host"),
            UrlValidationError::UnexpectedComponent(part) => {
                write!(f, "Service URLs must not contain a {}", part)
            }
        }
    }
}

impl std::error::Error for UrlValidationError {}

fn parse_web_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url =
        Url::parse(url_str.trim()).map_err(|e| UrlValidationError::InvalidUrl(e.to_string()))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Validate the `url` field of a paper.
pub fn validate_paper_url(url_str: &str) -> Result<Url, UrlValidationError> {
    parse_web_url(url_str)
}

/// Validate a base URL the server will call, such as a local Ollama host.
pub fn validate_service_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_web_url(url_str)?;

    if url.query().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("query string"));
    }
    if url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("fragment"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("username or password"));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_urls() {
        assert!(validate_paper_url("https://arxiv.org/abs/1234.5678").is_ok());
        assert!(validate_paper_url("http://example.com/paper.pdf").is_ok());
        assert!(matches!(
            validate_paper_url("ftp://example.com/paper.pdf"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_paper_url("example.com/paper"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_service_urls() {
        assert!(validate_service_url("http://localhost:11434").is_ok());
        assert!(validate_service_url("http://192.168.1.20:11434/ollama").is_ok());
        assert!(matches!(
            validate_service_url("http://localhost:11434/?x=1"),
            Err(UrlValidationError::UnexpectedComponent(_))
        ));
        assert!(matches!(
            validate_service_url("http://user:pw@localhost:11434"),
            Err(UrlValidationError::UnexpectedComponent(_))
        ));
    }
}
