//! Caller identity for the `/gis` routes.
//!
//! Authentication happens upstream; this service trusts the `X-User-Id` and
//! `X-User-Role` headers it attaches and only enforces role-based access.

use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest, HttpResponse, ResponseError};
use georise_gis_models::{Caller, Role};
use thiserror::Error;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Access failures, rendered as `{"error": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No usable identity on the request.
    #[error("Unauthorized")]
    Unauthorized,
    /// The identity's role may not use these routes.
    #[error("Forbidden")]
    Forbidden,
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

/// An authenticated caller allowed to query GIS data (agency staff or
/// admin). Extracting it rejects everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GisCaller(pub Caller);

impl FromRequest for GisCaller {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req.headers()).map(Self))
    }
}

/// Reads the caller from headers and checks its role.
///
/// # Errors
///
/// * [`AuthError::Unauthorized`] if either header is missing or invalid
/// * [`AuthError::Forbidden`] if the role may not query GIS data
pub fn authorize(headers: &HeaderMap) -> Result<Caller, AuthError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let id: i64 = header(USER_ID_HEADER)
        .and_then(|v| v.parse().ok())
        .ok_or(AuthError::Unauthorized)?;
    let role: Role = header(USER_ROLE_HEADER)
        .and_then(|v| v.parse().ok())
        .ok_or(AuthError::Unauthorized)?;

    if !role.can_query_gis() {
        log::debug!("Rejecting user {id} with role {role}");
        return Err(AuthError::Forbidden);
    }

    Ok(Caller::new(id, role))
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut req = TestRequest::default();
        for pair in pairs {
            req = req.insert_header(*pair);
        }
        req.to_http_request().headers().clone()
    }

    #[test]
    fn staff_and_admins_are_authorized() {
        assert_eq!(
            authorize(&headers(&[(USER_ID_HEADER, "7"), (USER_ROLE_HEADER, "agency_staff")])),
            Ok(Caller::new(7, Role::AgencyStaff))
        );
        assert_eq!(
            authorize(&headers(&[(USER_ID_HEADER, "1"), (USER_ROLE_HEADER, "admin")])),
            Ok(Caller::new(1, Role::Admin))
        );
    }

    #[test]
    fn missing_or_invalid_identity_is_unauthorized() {
        for pairs in [
            &[][..],
            &[(USER_ROLE_HEADER, "admin")][..],
            &[(USER_ID_HEADER, "abc"), (USER_ROLE_HEADER, "admin")][..],
            &[(USER_ID_HEADER, "1"), (USER_ROLE_HEADER, "superuser")][..],
        ] {
            assert_eq!(authorize(&headers(pairs)), Err(AuthError::Unauthorized));
        }
    }

    #[test]
    fn citizens_are_forbidden() {
        assert_eq!(
            authorize(&headers(&[(USER_ID_HEADER, "3"), (USER_ROLE_HEADER, "citizen")])),
            Err(AuthError::Forbidden)
        );
    }

    #[test]
    fn error_bodies_match_status() {
        let response = AuthError::Forbidden.error_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }
}
