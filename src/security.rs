use std::rc::Rc;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http::header, Error};
use futures_util::future::{ready, LocalBoxFuture, Ready};

/// The incident map pulls tiles from OpenStreetMap; everything else is same-origin.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
     img-src 'self' data: https://*.tile.openstreetmap.org; \
     style-src 'self' 'unsafe-inline'; \
     connect-src 'self'; \
     object-src 'none'; base-uri 'none'; frame-ancestors 'none'; form-action 'self'";

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Adds baseline security headers unless a handler already set them.
#[derive(Clone, Default)]
pub struct SecurityHeaders {
    pub enable_hsts: bool,
}

impl SecurityHeaders {
    pub fn new(enable_hsts: bool) -> Self {
        Self { enable_hsts }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddleware { service: Rc::new(service), enable_hsts: self.enable_hsts }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
    enable_hsts: bool,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let enable_hsts = self.enable_hsts;
        Box::pin(async move {
            let mut res = svc.call(req).await?;
            let headers = res.response_mut().headers_mut();
            let mut defaults = vec![
                (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
                (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                (header::X_FRAME_OPTIONS, "DENY"),
            ];
            if enable_hsts {
                defaults.push((header::STRICT_TRANSPORT_SECURITY, HSTS));
            }
            for (name, value) in defaults {
                if !headers.contains_key(&name) {
                    headers.insert(name, header::HeaderValue::from_static(value));
                }
            }
            Ok(res)
        })
    }
}
