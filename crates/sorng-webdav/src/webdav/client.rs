// ──────────────────────────────────────────────────────────────────────────────
// sorng-webdav · client
// ──────────────────────────────────────────────────────────────────────────────
// Low-level HTTP client for a WebDAV share:
//  • reqwest client built from the host settings (proxy, timeouts, TLS)
//  • URL composition with per-segment percent-encoding
//  • PROPFIND / MKCOL / DELETE / MOVE
//  • HTTP status → RemoteError mapping
// ──────────────────────────────────────────────────────────────────────────────

use crate::webdav::types::{propfind_body, DavResource, PropfindDepth};
use crate::webdav::xml::parse_multistatus;
use reqwest::{header, redirect, Client, Method, RequestBuilder, Response, StatusCode};
use sorng_remotefs::{Credentials, Host, RemoteError, RemoteErrorKind, RemoteResult};
use std::time::Duration;
use url::Url;

/// Authenticated client rooted at `scheme://host:port/`.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
    /// Limit for requests without a streamed body. `None` disables it.
    request_timeout: Option<Duration>,
}

impl DavClient {
    // ── Constructors ─────────────────────────────────────────────────────

    pub fn new(host: &Host) -> RemoteResult<Self> {
        let base = base_url(host)?;

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(host.connect_timeout_sec.max(1)))
            // Redirects would turn PROPFIND into GET; handled per request.
            .redirect(redirect::Policy::none())
            .user_agent(concat!("sorng-webdav/", env!("CARGO_PKG_VERSION")));

        if host.accept_invalid_certs {
            log::warn!("Accepting invalid certificates for {}", host.hostname);
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy) = &host.proxy {
            let mut p = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))
                .map_err(|e| RemoteError::configuration(format!("Invalid proxy: {}", e)))?;
            if let Some(user) = &proxy.username {
                p = p.basic_auth(user, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(p);
        }

        let http = builder
            .build()
            .map_err(|e| RemoteError::configuration(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            username: None,
            password: None,
            request_timeout: (host.data_timeout_sec > 0)
                .then(|| Duration::from_secs(host.data_timeout_sec)),
        })
    }

    // ── Setters / accessors ──────────────────────────────────────────────

    /// Anonymous credentials send no `Authorization` header.
    pub fn set_credentials(&mut self, credentials: &Credentials) {
        if credentials.is_anonymous() {
            self.username = None;
            self.password = None;
        } else {
            self.username = Some(credentials.username.clone());
            self.password = credentials.password.clone();
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    // ── URL builders ─────────────────────────────────────────────────────

    /// URL of a remote path. Collections get a trailing slash.
    pub fn url_for(&self, path: &str, collection: bool) -> RemoteResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::configuration(format!("{} cannot carry a path", self.base)))?;
            segments.clear();
            segments.extend(path.split('/').filter(|s| !s.is_empty() && *s != "."));
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    // ── Request plumbing ─────────────────────────────────────────────────

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    /// Request with the data timeout applied.
    fn bounded(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.request(method, url);
        match self.request_timeout {
            Some(t) => req.timeout(t),
            None => req,
        }
    }

    pub(crate) async fn send(&self, req: RequestBuilder, context: &str) -> RemoteResult<Response> {
        req.send().await.map_err(|e| transport_error(e, context))
    }

    // ── WebDAV methods ───────────────────────────────────────────────────

    /// PROPFIND `path`. A redirect to the collection form of the URL is
    /// followed once.
    pub async fn propfind(
        &self,
        path: &str,
        depth: PropfindDepth,
        collection: bool,
    ) -> RemoteResult<Vec<DavResource>> {
        let context = format!("PROPFIND {}", path);
        let mut collection = collection;
        loop {
            let req = self
                .bounded(dav_method(b"PROPFIND")?, self.url_for(path, collection)?)
                .header("Depth", depth.as_str())
                .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(propfind_body());
            let resp = self.send(req, &context).await?;
            let status = resp.status();

            if status.is_redirection() && !collection {
                log::debug!("{} redirected ({}), retrying as collection", context, status);
                collection = true;
                continue;
            }
            if status != StatusCode::MULTI_STATUS && !status.is_success() {
                return Err(status_error(status, &context).with_path(path));
            }
            let body = resp
                .text()
                .await
                .map_err(|e| transport_error(e, &context))?;
            return parse_multistatus(&body);
        }
    }

    /// MKCOL (create a collection).
    pub async fn mkcol(&self, path: &str) -> RemoteResult<()> {
        let context = format!("MKCOL {}", path);
        let req = self.bounded(dav_method(b"MKCOL")?, self.url_for(path, true)?);
        let resp = self.send(req, &context).await?;
        match resp.status() {
            // 405 on MKCOL means the resource already exists.
            StatusCode::METHOD_NOT_ALLOWED => Err(RemoteError::protocol(format!(
                "{}: already exists",
                context
            ))
            .with_code(405)
            .with_path(path)),
            _ => check(resp, &context).map_err(|e| e.with_path(path)),
        }
    }

    /// DELETE a resource. Collections are removed with their members.
    pub async fn delete(&self, path: &str, collection: bool) -> RemoteResult<()> {
        let context = format!("DELETE {}", path);
        let req = self.bounded(Method::DELETE, self.url_for(path, collection)?);
        let resp = self.send(req, &context).await?;
        check(resp, &context).map_err(|e| e.with_path(path))
    }

    /// MOVE without overwriting an existing target.
    pub async fn move_resource(&self, from: &str, to: &str) -> RemoteResult<()> {
        let context = format!("MOVE {} → {}", from, to);
        let req = self
            .bounded(dav_method(b"MOVE")?, self.url_for(from, false)?)
            .header("Destination", self.url_for(to, false)?.as_str())
            .header("Overwrite", "F");
        let resp = self.send(req, &context).await?;
        match resp.status() {
            StatusCode::PRECONDITION_FAILED => Err(RemoteError::protocol(format!(
                "{}: target exists",
                context
            ))
            .with_code(412)
            .with_path(to)),
            _ => check(resp, &context).map_err(|e| e.with_path(from)),
        }
    }
}

impl std::fmt::Debug for DavClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

// ── Free-standing helpers ────────────────────────────────────────────────────

fn base_url(host: &Host) -> RemoteResult<Url> {
    if host.hostname.trim().is_empty() {
        return Err(RemoteError::configuration("Host name is empty"));
    }
    let hostname = if host.hostname.contains(':') && !host.hostname.starts_with('[') {
        format!("[{}]", host.hostname)
    } else {
        host.hostname.clone()
    };
    let raw = format!("{}://{}:{}/", host.protocol.scheme(), hostname, host.port);
    Url::parse(&raw).map_err(|e| RemoteError::configuration(format!("Invalid URL {}: {}", raw, e)))
}

pub(crate) fn dav_method(name: &'static [u8]) -> RemoteResult<Method> {
    Method::from_bytes(name).map_err(|e| RemoteError::configuration(e.to_string()))
}

/// Accept 2xx / 207, otherwise map the status.
pub(crate) fn check(resp: Response, context: &str) -> RemoteResult<()> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(status_error(status, context))
    }
}

/// Classify an HTTP status into the shared error taxonomy.
pub fn status_error(status: StatusCode, context: &str) -> RemoteError {
    let code = status.as_u16();
    let kind = match code {
        401 => RemoteErrorKind::Authentication,
        403 | 423 => RemoteErrorKind::PermissionDenied,
        // 409: an intermediate collection is missing.
        404 | 409 | 410 => RemoteErrorKind::NotFound,
        408 | 504 => RemoteErrorKind::Timeout,
        507 => RemoteErrorKind::QuotaExceeded,
        501 => RemoteErrorKind::Unsupported,
        _ => RemoteErrorKind::Protocol,
    };
    let reason = status.canonical_reason().unwrap_or("unexpected status");
    RemoteError::new(kind, format!("{}: {}", context, reason)).with_code(code)
}

/// Map a transport failure. The raw text is logged, not surfaced.
pub fn transport_error(e: reqwest::Error, context: &str) -> RemoteError {
    log::warn!("{}: {}", context, e);
    if e.is_timeout() {
        RemoteError::timeout(format!("{}: timed out", context))
    } else if e.is_builder() {
        RemoteError::configuration(format!("{}: invalid request", context))
    } else if let Some(status) = e.status() {
        status_error(status, context)
    } else {
        RemoteError::connection(format!("{}: connection failed", context))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
