//! Cookie helpers for the httpOnly token cookies.
//!
//! The access cookie is `SameSite=Strict` since it only ever accompanies API
//! calls from the same origin; the refresh cookie is `Lax` so a top-level
//! navigation back to the app can still refresh the session. `Secure` is
//! decided per request from the forwarded protocol.

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// True when the request arrived over TLS according to the proxy.
pub fn request_is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Build the httpOnly cookie carrying the access token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE.to_string(), token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Build the httpOnly cookie carrying the refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE.to_string(), token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Build an expired cookie to clear the access token.
pub fn clear_access_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Build an expired cookie to clear the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_cookie_is_strict_and_http_only() {
        let cookie = access_cookie("tok", 1800, false);
        assert_eq!(cookie.name(), ACCESS_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(1800)));
    }

    #[test]
    fn refresh_cookie_is_lax() {
        let cookie = refresh_cookie("tok", 604800, true);
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn clear_cookies_expire_immediately() {
        assert_eq!(clear_access_cookie(false).max_age(), Some(Duration::ZERO));
        assert_eq!(clear_refresh_cookie(false).max_age(), Some(Duration::ZERO));
        assert!(clear_access_cookie(false).value().is_empty());
    }

    #[test]
    fn forwarded_proto_decides_secure() {
        let mut headers = HeaderMap::new();
        assert!(!request_is_secure(&headers));
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert!(request_is_secure(&headers));
        headers.insert("x-forwarded-proto", "http".parse().unwrap());
        assert!(!request_is_secure(&headers));
    }
}
