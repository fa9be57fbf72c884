use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use dvr_core::AccessToken;
use http::{header, HeaderValue, Request, Response, StatusCode};
use tower_http::validate_request::ValidateRequest;

/// The authenticated user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub i64);

/// Bearer-token check that maps each configured token to its user id and
/// stores it as an [`Owner`] extension. With no tokens configured every
/// request is rejected.
pub struct TokenValidate<ResBody> {
    tokens: Arc<HashMap<String, i64>>,
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> TokenValidate<ResBody> {
    pub fn new(tokens: &[AccessToken]) -> Self {
        Self {
            tokens: Arc::new(
                tokens
                    .iter()
                    .map(|entry| (entry.token.clone(), entry.user_id))
                    .collect(),
            ),
            _ty: PhantomData,
        }
    }
}

impl<ResBody> Clone for TokenValidate<ResBody> {
    fn clone(&self) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
            _ty: PhantomData,
        }
    }
}

impl<B: Default> ValidateRequest<B> for TokenValidate<B> {
    type ResponseBody = B;

    fn validate(&mut self, request: &mut Request<B>) -> Result<(), Response<Self::ResponseBody>> {
        let owner = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(bearer_token)
            .and_then(|token| self.tokens.get(token).copied());
        match owner {
            Some(user_id) => {
                request.extensions_mut().insert(Owner(user_id));
                Ok(())
            }
            None => {
                let mut response = Response::new(B::default());
                *response.status_mut() = StatusCode::UNAUTHORIZED;
                Err(response)
            }
        }
    }
}

fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let (scheme, token) = value.to_str().ok()?.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidate<String> {
        TokenValidate::new(&[
            AccessToken {
                token: "alpha".into(),
                user_id: 1,
            },
            AccessToken {
                token: "beta".into(),
                user_id: 2,
            },
        ])
    }

    fn request(auth: Option<&str>) -> Request<String> {
        let mut builder = Request::builder().uri("/dvr/jobs");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(String::new()).unwrap()
    }

    #[test]
    fn known_token_sets_owner() {
        let mut request = request(Some("Bearer beta"));
        validator().validate(&mut request).unwrap();
        assert_eq!(request.extensions().get::<Owner>(), Some(&Owner(2)));
    }

    #[test]
    fn missing_or_unknown_token_is_unauthorized() {
        for auth in [None, Some("Bearer gamma"), Some("Basic YWxwaGE6"), Some("alpha")] {
            let mut request = request(auth);
            let response = validator().validate(&mut request).unwrap_err();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn empty_token_list_rejects_everything() {
        let mut request = request(Some("Bearer alpha"));
        let mut validate = TokenValidate::<String>::new(&[]);
        assert!(validate.validate(&mut request).is_err());
    }
}
