//! Per-request state machine.
//!
//! Each request passes through the same stages in order:
//!
//! 1. Authentication gate (when an [`Authenticator`] is configured)
//! 2. `OPTIONS`, answered without touching the filesystem
//! 3. Percent-decoding and sandbox resolution of the request path
//! 4. Routing by verb to the describer, renderer or executor
//!
//! Every outcome, including a panic inside a handler, becomes exactly one
//! response. Failures are reported as a status code with a short reason line.

use crate::body::{self, DavBody};
use crate::credentials::Authenticator;
use crate::error::{DavError, DavResult};
use crate::ops::{self, Retrieved, StoreOutcome, TransferMode};
use crate::render;
use crate::resource;
use crate::sandbox::StorageRoot;
use bytes::Bytes;
use futures::FutureExt;
use hyper::body::Body;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Verbs listed in the `Allow` header.
pub const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, PROPFIND, PROPPATCH, COPY, MOVE";

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

static DEPTH: HeaderName = HeaderName::from_static("depth");
static DESTINATION: HeaderName = HeaderName::from_static("destination");
static OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
static DAV: HeaderName = HeaderName::from_static("dav");
static MS_AUTHOR_VIA: HeaderName = HeaderName::from_static("ms-author-via");

/// A request verb this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Options,
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Propfind,
    Proppatch,
    Copy,
    Move,
}

impl Verb {
    /// Parse an HTTP method name. Unknown methods yield `None`.
    pub fn parse(method: &str) -> Option<Self> {
        Some(match method {
            "OPTIONS" => Self::Options,
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "MKCOL" => Self::Mkcol,
            "PROPFIND" => Self::Propfind,
            "PROPPATCH" => Self::Proppatch,
            "COPY" => Self::Copy,
            "MOVE" => Self::Move,
            _ => return None,
        })
    }
}

/// How far a PROPFIND reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// The target only.
    Zero,
    /// The target and its direct children.
    Children,
}

impl Depth {
    /// `0` (or no header) is the target only; any other value lists children.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("0") => Self::Zero,
            Some(_) => Self::Children,
        }
    }
}

/// Everything the router needs from the request head.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Parsed verb, `None` for methods this server does not implement.
    pub verb: Option<Verb>,
    /// Method name as sent.
    pub method: String,
    /// Percent-decoded request path.
    pub path: String,
    pub depth: Depth,
    /// Raw `Destination` header.
    pub destination: Option<String>,
    /// `Overwrite` header; anything but `F` means true.
    pub overwrite: bool,
    pub authorization: Option<String>,
}

impl RequestContext {
    /// Extract the context from a request head.
    pub fn from_parts(method: &str, uri: &Uri, headers: &HeaderMap) -> DavResult<Self> {
        let text = |name: &HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

        Ok(Self {
            verb: Verb::parse(method),
            method: method.to_string(),
            path: decode_path(uri.path())?,
            depth: Depth::from_header(text(&DEPTH)),
            destination: text(&DESTINATION).map(str::to_string),
            overwrite: !text(&OVERWRITE).is_some_and(|v| v.trim().eq_ignore_ascii_case("f")),
            authorization: text(&header::AUTHORIZATION).map(str::to_string),
        })
    }
}

/// Routes requests against a storage root.
pub struct Dispatcher {
    root: StorageRoot,
    auth: Option<Arc<dyn Authenticator>>,
    challenge: HeaderValue,
}

impl Dispatcher {
    /// A dispatcher that accepts every request.
    pub fn new(root: StorageRoot) -> Self {
        Self {
            root,
            auth: None,
            challenge: HeaderValue::from_static("Basic realm=\"WebDAV Server\""),
        }
    }

    /// Require Basic credentials checked by `auth`.
    #[must_use]
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>, realm: &str) -> Self {
        match HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm.replace('"', "'"))) {
            Ok(value) => self.challenge = value,
            Err(e) => warn!(realm, error = %e, "Realm is not a valid header value, using default"),
        }
        self.auth = Some(auth);
        self
    }

    /// The storage root requests are resolved against.
    pub fn root(&self) -> &StorageRoot {
        &self.root
    }

    /// Handle one request. Never fails: errors and panics become responses.
    #[instrument(skip_all, fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn handle<B>(&self, req: Request<B>) -> Response<DavBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let head_only = req.method() == hyper::Method::HEAD;
        let response = match AssertUnwindSafe(self.dispatch(req)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => self.error_response(&e),
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Request handler panicked");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        let response = if head_only {
            strip_body(response)
        } else {
            response
        };

        info!(status = response.status().as_u16(), "Request completed");
        response
    }

    async fn dispatch<B>(&self, req: Request<B>) -> DavResult<Response<DavBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();

        if let Some(auth) = &self.auth {
            let authorized = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|h| auth.validate_header(h));
            if !authorized {
                return Err(DavError::Unauthorized);
            }
        }

        if parts.method == hyper::Method::OPTIONS {
            return Ok(options_response());
        }

        let ctx = RequestContext::from_parts(parts.method.as_str(), &parts.uri, &parts.headers)?;
        let target = self.root.resolve(&ctx.path).await?;

        let Some(verb) = ctx.verb else {
            return Err(DavError::Unsupported(ctx.method));
        };
        debug!(?verb, target = %target.logical(), "Routing request");

        match verb {
            Verb::Options => Ok(options_response()),
            Verb::Get | Verb::Head => match ops::retrieve(&self.root, &target).await? {
                Retrieved::Index(html) => {
                    let len = html.len();
                    let mut resp = response(StatusCode::OK, body::full(html));
                    set(&mut resp, header::CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
                    set(&mut resp, header::CONTENT_LENGTH, HeaderValue::from(len));
                    Ok(resp)
                }
                Retrieved::File { resource, reader } => {
                    let last_modified = HeaderValue::from_str(&resource.last_modified())
                        .map_err(|e| DavError::Internal(e.to_string()))?;
                    let content_type = match resource.kind {
                        resource::ResourceKind::File { content_type, .. } => content_type,
                        resource::ResourceKind::Collection => resource::DEFAULT_CONTENT_TYPE,
                    };
                    let body = if verb == Verb::Head {
                        body::empty()
                    } else {
                        body::stream(reader)
                    };
                    let mut resp = response(StatusCode::OK, body);
                    set(&mut resp, header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                    set(&mut resp, header::CONTENT_LENGTH, HeaderValue::from(resource.size()));
                    set(&mut resp, header::LAST_MODIFIED, last_modified);
                    Ok(resp)
                }
            },
            Verb::Put => {
                let status = match ops::store(&target, body).await? {
                    StoreOutcome::Created => StatusCode::CREATED,
                    StoreOutcome::Replaced => StatusCode::NO_CONTENT,
                };
                Ok(response(status, body::empty()))
            }
            Verb::Delete => {
                ops::delete(&target).await?;
                Ok(response(StatusCode::NO_CONTENT, body::empty()))
            }
            Verb::Mkcol => {
                ops::create_collection(&target).await?;
                Ok(response(StatusCode::CREATED, body::empty()))
            }
            Verb::Propfind => {
                let resource = resource::describe(&target).await?;
                let is_collection = resource.is_collection();
                let mut listing = vec![resource];
                if is_collection && ctx.depth == Depth::Children {
                    listing.extend(resource::describe_children(&self.root, &target).await?);
                }
                debug!(entries = listing.len(), depth = ?ctx.depth, "PROPFIND listing");
                Ok(multistatus_response(render::multistatus(&listing)?))
            }
            Verb::Proppatch => {
                let href = render::href(target.logical(), ctx.path.ends_with('/'));
                Ok(multistatus_response(render::proppatch_ack(&href)?))
            }
            Verb::Copy | Verb::Move => {
                let raw = ctx
                    .destination
                    .as_deref()
                    .ok_or_else(|| DavError::BadRequest("missing Destination header".into()))?;
                let destination = self.root.resolve(&destination_path(raw)?).await?;
                let mode = if verb == Verb::Copy {
                    TransferMode::Copy
                } else {
                    TransferMode::Move
                };
                ops::copy_or_move(&target, &destination, mode, ctx.overwrite).await?;
                Ok(response(StatusCode::CREATED, body::empty()))
            }
        }
    }

    fn error_response(&self, e: &DavError) -> Response<DavBody> {
        let status = e.status_code();
        if e.is_internal() {
            error!(error = %e, "Request failed");
        } else if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::UNAUTHORIZED
        ) {
            debug!(error = %e, status = status.as_u16(), "Request rejected");
        } else {
            warn!(error = %e, status = status.as_u16(), "Request rejected");
        }

        if status == StatusCode::UNAUTHORIZED {
            let mut resp = text_response(status, "Authentication required");
            set(&mut resp, header::WWW_AUTHENTICATE, self.challenge.clone());
            return resp;
        }
        text_response(status, status.canonical_reason().unwrap_or("Error"))
    }
}

/// Decode a percent-encoded request path. Invalid UTF-8 is a bad request.
pub fn decode_path(raw: &str) -> DavResult<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| DavError::BadRequest(format!("request path is not valid UTF-8: {e}")))
}

/// Extract the decoded path from a `Destination` header.
///
/// Both absolute URLs and absolute paths are accepted; the host is ignored.
pub fn destination_path(raw: &str) -> DavResult<String> {
    let raw = raw.trim();
    let path = match raw.parse::<Uri>() {
        Ok(uri) if uri.scheme().is_some() => uri.path().to_string(),
        Ok(uri) if raw.starts_with('/') => uri.path().to_string(),
        _ if raw.starts_with('/') => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
        _ => {
            return Err(DavError::BadRequest(format!(
                "Destination is neither an absolute URL nor an absolute path: {raw}"
            )));
        }
    };
    decode_path(&path)
}

fn options_response() -> Response<DavBody> {
    let mut resp = response(StatusCode::OK, body::empty());
    set(&mut resp, DAV.clone(), HeaderValue::from_static("1"));
    set(&mut resp, header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    set(&mut resp, MS_AUTHOR_VIA.clone(), HeaderValue::from_static("DAV"));
    set(&mut resp, header::CONTENT_LENGTH, HeaderValue::from(0u64));
    resp
}

fn multistatus_response(xml: Vec<u8>) -> Response<DavBody> {
    let len = xml.len();
    let mut resp = response(StatusCode::MULTI_STATUS, body::full(xml));
    set(&mut resp, header::CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    set(&mut resp, header::CONTENT_LENGTH, HeaderValue::from(len));
    resp
}

fn text_response(status: StatusCode, reason: &str) -> Response<DavBody> {
    let mut resp = response(status, body::full(reason.to_string()));
    set(&mut resp, header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
    resp
}

fn response(status: StatusCode, body: DavBody) -> Response<DavBody> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

fn set(resp: &mut Response<DavBody>, name: HeaderName, value: HeaderValue) {
    resp.headers_mut().insert(name, value);
}

fn strip_body(resp: Response<DavBody>) -> Response<DavBody> {
    let (parts, _) = resp.into_parts();
    Response::from_parts(parts, body::empty())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
