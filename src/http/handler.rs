//! Request routing: listing, file streaming, and rejections.

use crate::config::Config;
use crate::http::body::body_channel;
use crate::http::listing;
use crate::streaming::{drain, CompressionPolicy, Encoding, Framing, ReadSettings, StreamPlan};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ResponseBody = BoxBody<Bytes, io::Error>;

/// Shared per-server request handler
#[derive(Debug, Clone)]
pub struct RequestHandler {
    doc_root: PathBuf,
    host_name: String,
    read: ReadSettings,
    policy: Arc<CompressionPolicy>,
}

impl RequestHandler {
    pub fn new(
        doc_root: impl Into<PathBuf>,
        host_name: impl Into<String>,
        read: ReadSettings,
        policy: CompressionPolicy,
    ) -> Self {
        Self {
            doc_root: doc_root.into(),
            host_name: host_name.into(),
            read,
            policy: Arc::new(policy),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.file.doc_root.clone(),
            config.server.host_name.clone(),
            config.read_settings(),
            config.compression.policy(),
        )
    }

    /// Answer one request. File bodies are streamed by a spawned drain task
    /// whose pipeline is cancelled with `conn_cancel`.
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        peer: SocketAddr,
        conn_cancel: &CancellationToken,
    ) -> Response<ResponseBody> {
        let path = req.uri().path().to_string();
        let accepts = accepted_encodings(&req);
        let is_get = req.method() == Method::GET;
        drop(req);

        tracing::info!(%peer, path = %path, "requesting");

        if !is_get {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }
        if path.contains("..") || path.matches('/').count() > 1 {
            return status(StatusCode::FORBIDDEN);
        }
        if path == "/" {
            return self.listing().await;
        }

        let name = path.trim_start_matches('/');
        self.serve_file(name, &accepts, peer, conn_cancel).await
    }

    async fn listing(&self) -> Response<ResponseBody> {
        match listing::read_entries(&self.doc_root).await {
            Ok(entries) => {
                let html = listing::render(&self.host_name, &entries);
                let mut resp = full(StatusCode::OK, html);
                resp.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                resp
            }
            Err(e) => {
                tracing::warn!(root = %self.doc_root.display(), error = %e, "cannot list document root");
                status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn serve_file(
        &self,
        name: &str,
        accepts: &[String],
        peer: SocketAddr,
        conn_cancel: &CancellationToken,
    ) -> Response<ResponseBody> {
        let file_path = self.doc_root.join(name);
        let size = match tokio::fs::metadata(&file_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return status(StatusCode::NOT_FOUND),
            Err(e) => {
                tracing::debug!(path = %file_path.display(), error = %e, "not found");
                return status(StatusCode::NOT_FOUND);
            }
        };

        let compress = self.policy.should_compress(size, name)
            && accepts_encoding(accepts, self.policy.encoding);

        let token = conn_cancel.child_token();
        let plan = StreamPlan::start(
            &file_path,
            size,
            compress,
            self.read,
            &self.policy,
            token.clone(),
        );

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream");
        let content_length = match plan.framing {
            Framing::Sized(len) => {
                builder = builder.header(header::CONTENT_LENGTH, len);
                Some(len)
            }
            Framing::Encoded(encoding) => {
                builder = builder.header(header::CONTENT_ENCODING, encoding.as_str());
                None
            }
        };

        let (mut sink, body) = body_channel(content_length);
        let file = name.to_string();
        tokio::spawn(async move {
            let _guard = token.drop_guard();
            let report = drain(plan.stream, &mut sink).await;
            if report.outcome.is_completed() {
                tracing::info!(%peer, file = %file, chunks = report.chunks, bytes = report.bytes, "served");
            } else {
                tracing::warn!(
                    %peer,
                    file = %file,
                    chunks = report.chunks,
                    bytes = report.bytes,
                    outcome = %report.outcome,
                    "stream ended early"
                );
            }
        });

        match builder.body(body.boxed()) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "cannot build response");
                status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Codings listed in `Accept-Encoding`, lowercased, without q-values.
/// Codings with `q=0` are left out.
fn accepted_encodings<B>(req: &Request<B>) -> Vec<String> {
    req.headers()
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|item| {
            let mut parts = item.split(';').map(str::trim);
            let coding = parts.next()?.to_ascii_lowercase();
            let refused = parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            (!coding.is_empty() && !refused).then_some(coding)
        })
        .collect()
}

fn accepts_encoding(accepts: &[String], encoding: Encoding) -> bool {
    accepts
        .iter()
        .any(|coding| coding == encoding.as_str() || coding == "*")
}

fn status(code: StatusCode) -> Response<ResponseBody> {
    let reason = code.canonical_reason().unwrap_or("");
    full(code, reason.to_string())
}

fn full(code: StatusCode, text: String) -> Response<ResponseBody> {
    let mut resp = Response::new(
        Full::new(Bytes::from(text))
            .map_err(|never| match never {})
            .boxed(),
    );
    *resp.status_mut() = code;
    resp
}
