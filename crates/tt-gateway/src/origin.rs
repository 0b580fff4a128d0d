//! WebSocket `Origin` allow-list check (§4.E connection admission). Browsers
//! don't apply CORS to WebSocket upgrades, so without this check any page
//! could open a socket to this server and ride the user's loopback trust.

use axum::http::{HeaderMap, StatusCode};

pub fn validate(headers: &HeaderMap, allowed: &[String]) -> Result<(), StatusCode> {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .ok_or(StatusCode::FORBIDDEN)?
        .to_str()
        .map_err(|_| StatusCode::FORBIDDEN)?;

    let matches = allowed.iter().any(|allowed| {
        if origin == allowed {
            return true;
        }
        match origin.strip_prefix(allowed.as_str()) {
            Some(remainder) => remainder
                .strip_prefix(':')
                .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false),
            None => false,
        }
    });

    if matches {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins() -> Vec<String> {
        vec!["http://localhost".into(), "http://127.0.0.1".into()]
    }

    fn headers_with(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ORIGIN, origin.parse().unwrap());
        headers
    }

    #[test]
    fn accepts_exact_match() {
        assert!(validate(&headers_with("http://localhost"), &origins()).is_ok());
    }

    #[test]
    fn accepts_matching_origin_with_port() {
        assert!(validate(&headers_with("http://localhost:5173"), &origins()).is_ok());
    }

    #[test]
    fn rejects_missing_origin() {
        assert_eq!(validate(&HeaderMap::new(), &origins()), Err(StatusCode::FORBIDDEN));
    }

    #[test]
    fn rejects_foreign_origin() {
        assert_eq!(
            validate(&headers_with("http://evil.example"), &origins()),
            Err(StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn rejects_prefix_without_port_separator() {
        assert_eq!(
            validate(&headers_with("http://localhost.evil.example"), &origins()),
            Err(StatusCode::FORBIDDEN)
        );
    }
}
