//! Caller identity extraction.
//!
//! Authentication itself is a collaborator: a trusted front proxy
//! validates credentials and forwards the identity in headers. This
//! extractor only reads and shapes that identity; handlers then enforce
//! ownership, tenancy, and admin checks with it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use concord_domain::{Caller, Error, Result};

pub const USER_ID_HEADER: &str = "x-auth-user-id";
pub const USERNAME_HEADER: &str = "x-auth-username";
pub const ORG_ID_HEADER: &str = "x-auth-org-id";
pub const ADMIN_HEADER: &str = "x-auth-admin";
pub const INSTANCE_ADMIN_HEADER: &str = "x-auth-instance-admin";

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// Build a caller from forwarded identity headers.
pub fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    Some(Caller {
        user_id: header(headers, USER_ID_HEADER)?.to_owned(),
        username: header(headers, USERNAME_HEADER).unwrap_or("unknown").to_owned(),
        org_id: header(headers, ORG_ID_HEADER)?.to_owned(),
        is_admin: header(headers, ADMIN_HEADER) == Some("true"),
        is_instance_admin: header(headers, INSTANCE_ADMIN_HEADER) == Some("true"),
    })
}

/// Axum extractor wrapper so handlers take `Identity` directly.
pub struct Identity(pub Caller);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        match caller_from_headers(&parts.headers) {
            Some(caller) => Ok(Identity(caller)),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "missing or incomplete identity" })),
            )
                .into_response()),
        }
    }
}

/// Organization-admin gate.
pub fn require_admin(caller: &Caller) -> Result<()> {
    if caller.is_admin || caller.is_instance_admin {
        Ok(())
    } else {
        Err(Error::Forbidden("organization admin required".into()))
    }
}

/// Instance-admin gate.
pub fn require_instance_admin(caller: &Caller) -> Result<()> {
    if caller.is_instance_admin {
        Ok(())
    } else {
        Err(Error::Forbidden("instance admin required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn full_identity_parsed() {
        let caller = caller_from_headers(&headers(&[
            (USER_ID_HEADER, "u1"),
            (USERNAME_HEADER, "alice"),
            (ORG_ID_HEADER, "org-a"),
            (ADMIN_HEADER, "true"),
        ]))
        .unwrap();
        assert_eq!(caller.user_id, "u1");
        assert_eq!(caller.org_id, "org-a");
        assert!(caller.is_admin);
        assert!(!caller.is_instance_admin);
    }

    #[test]
    fn missing_org_rejected() {
        assert!(caller_from_headers(&headers(&[(USER_ID_HEADER, "u1")])).is_none());
    }

    #[test]
    fn admin_gates() {
        let mut caller = Caller::member("u1", "alice", "org-a");
        assert!(require_admin(&caller).is_err());
        caller.is_admin = true;
        assert!(require_admin(&caller).is_ok());
        assert!(require_instance_admin(&caller).is_err());
    }
}
