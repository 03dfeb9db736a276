use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; an empty token counts as missing.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extracted() {
        assert_eq!(
            extract_bearer_token(&headers("Bearer abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(
            extract_bearer_token(&headers("bearer   abc.def ")).as_deref(),
            Some("abc.def")
        );
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(extract_bearer_token(&HeaderMap::new()).is_none());
        assert!(extract_bearer_token(&headers("Basic dXNlcjpwYXNz")).is_none());
        assert!(extract_bearer_token(&headers("Bearer")).is_none());
        assert!(extract_bearer_token(&headers("Bearer   ")).is_none());
    }
}
