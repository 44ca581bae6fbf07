//! Cross-origin policy.
//!
//! `ALLOWED_ORIGINS` holds a comma-separated allowlist. When it is unset or
//! empty every origin is accepted.

use actix_cors::Cors;

/// Parses a comma-separated origin list, dropping blank entries.
#[must_use]
pub fn parse_allowed_origins(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Reads the allowlist from `ALLOWED_ORIGINS`.
#[must_use]
pub fn allowed_origins_from_env() -> Vec<String> {
    parse_allowed_origins(std::env::var("ALLOWED_ORIGINS").ok().as_deref())
}

/// Builds the CORS middleware for `origins`. Credentials are allowed in
/// both modes.
#[must_use]
pub fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }

    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .expose_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
    use actix_web::{App, HttpResponse, test, web};

    use super::*;

    #[::core::prelude::v1::test]
    fn parses_trimmed_non_empty_origins() {
        assert_eq!(
            parse_allowed_origins(Some(" https://a.example , ,https://b.example,")),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_allowed_origins(Some(" , ")).is_empty());
        assert!(parse_allowed_origins(None).is_empty());
    }

    macro_rules! app {
        ($origins:expr) => {
            test::init_service(
                App::new()
                    .wrap(build_cors(&$origins))
                    .route("/", web::get().to(HttpResponse::Ok)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn allowlisted_origin_is_echoed() {
        let app = app!(vec!["https://ops.example".to_string()]);
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((ORIGIN, "https://ops.example"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://ops.example"
        );
    }

    #[actix_web::test]
    async fn foreign_origin_is_refused() {
        let app = app!(vec!["https://ops.example".to_string()]);
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((ORIGIN, "https://elsewhere.example"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert!(res.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[actix_web::test]
    async fn empty_allowlist_accepts_any_origin() {
        let app = app!(Vec::<String>::new());
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((ORIGIN, "https://elsewhere.example"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://elsewhere.example"
        );
    }
}
