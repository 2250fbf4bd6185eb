// Copyright (c) 2026 Orbitfs
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Read-only HTTP viewer served on the node's own TLS listener: store
//! keys, raw values, document and reference browsing, subscription
//! streaming and Prometheus metrics.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hyper_util::rt::TokioIo;
use prometheus::Encoder;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tower::util::ServiceExt;
use tracing::debug;

use crate::core::types::DIRECTORY_CONTENT_TYPE;
use crate::networking::error::NodeError;
use crate::networking::node::Node;

/// Viewer errors render as 500 with the error text.
struct AppError(String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0).into_response()
    }
}

impl From<NodeError> for AppError {
    fn from(e: NodeError) -> Self {
        AppError(e.to_string())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The viewer routes.
pub(crate) fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .route("/store/:key", get(store_value))
        .route("/document/*rest", get(document_view))
        .route("/reference/*rest", get(reference_view))
        .route("/subscribe/:channel", get(subscribe_view))
        .with_state(node)
}

async fn index(State(node): State<Arc<Node>>) -> Result<Html<String>, AppError> {
    let keys = node
        .store()
        .keys()
        .map_err(|e| AppError(e.to_string()))?;
    let mut html = String::from("<h1>Orbitfs node</h1><h2>Store keys:</h2>");
    for key in keys {
        let encoded = URL_SAFE.encode(key.as_bytes());
        html.push_str(&format!(
            r#"<li><a href="/store/{}">{}</a></li>"#,
            encoded,
            escape(&key)
        ));
    }
    Ok(Html(html))
}

async fn metrics(State(node): State<Arc<Node>>) -> Result<Response, AppError> {
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&node.metrics().registry.gather(), &mut buf)
        .map_err(|e| AppError(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response())
}

async fn store_value(
    State(node): State<Arc<Node>>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let raw = URL_SAFE
        .decode(&key)
        .map_err(|e| AppError(format!("bad key encoding: {e}")))?;
    let key = String::from_utf8(raw).map_err(|e| AppError(format!("bad key: {e}")))?;
    let value = node
        .store()
        .get(&key)
        .map_err(|e| AppError(e.to_string()))?
        .ok_or_else(|| AppError(format!("no value for {key:?}")))?;
    Ok(value.into_response())
}

fn serve_document(doc: crate::core::types::Document) -> Response {
    let content_type = header::HeaderValue::from_str(&doc.content_type)
        .unwrap_or(header::HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], doc.data).into_response()
}

/// `/document/<access-id>/<path…>`: resolve through directory children,
/// serving `index.html` for bare directory URLs and redirecting directory
/// paths missing their trailing slash.
async fn document_view(
    State(node): State<Arc<Node>>,
    Path(rest): Path<String>,
    uri: Uri,
) -> Result<Response, AppError> {
    let trailing_slash = rest.ends_with('/');
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let access_id = segments
        .next()
        .ok_or_else(|| AppError("missing access id".to_string()))?;

    let mut doc = node.get(access_id).await?;
    for segment in segments {
        let child = doc
            .children
            .get(segment)
            .cloned()
            .ok_or_else(|| AppError(format!("document missing child {segment:?}")))?;
        doc = node.get(&child).await?;
    }

    if doc.content_type == DIRECTORY_CONTENT_TYPE {
        if !trailing_slash {
            return Ok(Redirect::permanent(&format!("{}/", uri.path())).into_response());
        }
        if let Some(index_id) = doc.children.get("index.html").cloned() {
            let index_doc = node.get(&index_id).await?;
            return Ok(serve_document(index_doc));
        }
        let mut html = format!("<h1>{}</h1>", escape(uri.path()));
        for name in doc.children.keys() {
            html.push_str(&format!(
                r#"<li><a href="{}">{}</a></li>"#,
                escape(name),
                escape(name)
            ));
        }
        return Ok(Html(html).into_response());
    }
    Ok(serve_document(doc))
}

/// `/reference/<ref-id[:key]>/<path…>`: resolve the reference and rewrite
/// a `document@ID` or `reference@ID` value into the corresponding path.
async fn reference_view(
    State(node): State<Arc<Node>>,
    Path(rest): Path<String>,
) -> Result<Response, AppError> {
    let (reference_id, remainder) = match rest.split_once('/') {
        Some((id, remainder)) => (id, remainder),
        None => (rest.as_str(), ""),
    };

    let reference = node.get_reference(reference_id).await?;
    let value = String::from_utf8_lossy(&reference.value).into_owned();

    if let Some(target) = value.strip_prefix("document@") {
        return Ok(Redirect::temporary(&format!("/document/{target}/{remainder}")).into_response());
    }
    if let Some(target) = value.strip_prefix("reference@") {
        return Ok(
            Redirect::temporary(&format!("/reference/{target}/{remainder}")).into_response(),
        );
    }
    Ok(reference.value.into_response())
}

/// `/subscribe/<channel-id>`: stream messages as JSON lines, one flush per
/// message.
async fn subscribe_view(
    State(node): State<Arc<Node>>,
    Path(channel): Path<String>,
) -> Result<Response, AppError> {
    let rx = node.subscribe_stream(&channel, 0, -1).await?;
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        let mut line = serde_json::to_string(&message).ok()?;
        line.push('\n');
        Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), rx))
    });
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Serve one already-accepted TLS stream as HTTP/1.1, replaying the bytes
/// consumed by the protocol sniff.
pub(crate) async fn serve_http<S>(node: Arc<Node>, peeked: Vec<u8>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let app = router(node);
    let io = TokioIo::new(PrefixedIo::new(peeked, stream));
    let service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
        let app = app.clone();
        async move { app.oneshot(request.map(Body::new)).await }
    });
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
    {
        debug!(err = %e, "http connection ended");
    }
}

/// A stream with a few already-read bytes stitched back onto the front.
pub(crate) struct PrefixedIo<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> PrefixedIo<S> {
    pub(crate) fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.offset < self.prefix.len() {
            let n = (self.prefix.len() - self.offset).min(buf.remaining());
            let offset = self.offset;
            buf.put_slice(&self.prefix[offset..offset + n]);
            self.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedIo<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
