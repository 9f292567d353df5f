//! Identity extraction at the HTTP edge.
//!
//! The upstream identity provider terminates real authentication; this
//! surface trusts the forwarded subject in `Authorization: Bearer <subject>`
//! plus optional profile headers. Absence is handled by the engine: an error
//! outside dev-bypass mode, a synthesized fixed user inside it.

use ar_engine::Identity;
use axum::http::HeaderMap;

/// Pull the forwarded identity out of the request headers, if any.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let subject = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let header_string = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
    };

    Some(Identity {
        token_identifier: subject.to_string(),
        name: header_string("x-identity-name"),
        email: header_string("x-identity-email"),
        picture_url: header_string("x-identity-picture"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_subject_and_profile() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer oauth|u123"));
        headers.insert("x-identity-name", HeaderValue::from_static("Ada"));

        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(identity.token_identifier, "oauth|u123");
        assert_eq!(identity.name.as_deref(), Some("Ada"));
        assert!(identity.email.is_none());
    }

    #[test]
    fn missing_or_malformed_is_none() {
        assert!(identity_from_headers(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(identity_from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(identity_from_headers(&headers).is_none());
    }
}
