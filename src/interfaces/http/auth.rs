use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};

use crate::domain::error::{AppError, Result};
use crate::domain::principal::Principal;
use crate::infrastructure::config::AuthConfig;

/// Extractor for the caller behind `Authorization: Bearer <token>`.
pub struct Authenticated(pub Principal);

impl FromRequest for Authenticated {
    type Error = AppError;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match req.app_data::<web::Data<AuthConfig>>() {
            Some(auth) => resolve_principal(req, auth).map(Authenticated),
            None => Err(AppError::Internal("Auth config not registered".to_string())),
        };
        ready(result)
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn resolve_principal(req: &HttpRequest, auth: &AuthConfig) -> Result<Principal> {
    if let Some(principal) = bearer_token(req).and_then(|token| auth.tokens.get(token)) {
        return Ok(Principal::new(principal.clone()));
    }
    if auth.allow_anonymous {
        return Ok(Principal::anonymous());
    }
    Err(AppError::Unauthorized(
        "Missing or unknown bearer token".to_string(),
    ))
}
