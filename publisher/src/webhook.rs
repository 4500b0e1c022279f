use crate::PublisherError;
use crate::dispatcher::Dispatcher;
use crate::events::Event;
use crate::metrics_defs::WEBHOOKS_REJECTED;
use hmac::{Hmac, Mac};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use sha2::Sha256;
use shared::counter;
use shared::http::{make_boxed_error_response, make_text_response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const RECEIVED_MESSAGE: &str = "Event received. Have a nice day.";

// GitHub caps payloads at 25 MB
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rejection {
    Method,
    ContentType,
    MissingEvent,
    Body,
    Signature,
    Payload,
}

impl Rejection {
    fn status(self) -> StatusCode {
        match self {
            Rejection::Method => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::Signature => StatusCode::UNAUTHORIZED,
            Rejection::Body => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::ContentType | Rejection::MissingEvent | Rejection::Payload => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Rejection::Method => "method",
            Rejection::ContentType => "content_type",
            Rejection::MissingEvent => "missing_event",
            Rejection::Body => "body",
            Rejection::Signature => "signature",
            Rejection::Payload => "payload",
        }
    }
}

/// Receives GitHub webhook deliveries and hands verified events to the
/// dispatcher. The response never waits for the codegen run.
pub struct WebhookService {
    handler: Arc<WebhookHandler>,
}

impl WebhookService {
    pub fn new(secret: impl Into<Vec<u8>>, dispatcher: Arc<Dispatcher>) -> Self {
        WebhookService {
            handler: Arc::new(WebhookHandler {
                secret: secret.into(),
                dispatcher,
            }),
        }
    }
}

impl Service<Request<Incoming>> for WebhookService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = PublisherError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move { Ok(handler.respond(req).await) })
    }
}

struct WebhookHandler {
    secret: Vec<u8>,
    dispatcher: Arc<Dispatcher>,
}

impl WebhookHandler {
    async fn respond<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, Infallible>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.accept(req).await {
            Ok((event, delivery)) => {
                tracing::debug!(event_type = event.event_type(), %delivery, "Webhook received");
                self.dispatcher.dispatch(event, delivery);
                make_text_response(StatusCode::OK, RECEIVED_MESSAGE)
            }
            Err(rejection) => {
                counter!(WEBHOOKS_REJECTED, "reason" => rejection.reason()).increment(1);
                tracing::warn!(reason = rejection.reason(), "Webhook rejected");
                make_boxed_error_response(rejection.status())
            }
        }
    }

    async fn accept<B>(&self, req: Request<B>) -> Result<(Event, String), Rejection>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.method() != Method::POST {
            return Err(Rejection::Method);
        }

        let headers = req.headers();
        let is_json = header(headers, CONTENT_TYPE.as_str())
            .and_then(|value| value.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
        if !is_json {
            return Err(Rejection::ContentType);
        }
        let event_type = header(headers, EVENT_HEADER)
            .ok_or(Rejection::MissingEvent)?
            .to_string();
        let delivery = header(headers, DELIVERY_HEADER)
            .unwrap_or_default()
            .to_string();
        let signature = header(headers, SIGNATURE_HEADER).map(str::to_string);

        let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|_| Rejection::Body)?
            .to_bytes();

        if !verify_signature(&self.secret, signature.as_deref(), &body) {
            return Err(Rejection::Signature);
        }

        let event = Event::parse(&event_type, &body).map_err(|err| {
            tracing::debug!(%event_type, %delivery, error = %err, "Malformed payload");
            Rejection::Payload
        })?;
        Ok((event, delivery))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Checks a `sha256=<hex>` signature of `body` keyed with `secret`.
fn verify_signature(secret: &[u8], signature: Option<&str>, body: &[u8]) -> bool {
    let Some(expected) = signature
        .and_then(|value| value.strip_prefix("sha256="))
        .and_then(|digest| hex::decode(digest).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
