use std::sync::Arc;

use bytes::{Bytes, BytesMut, Buf};

use crate::riverfront::auth::{JwtKeyStore, ScramVerifierStore};
use crate::riverfront::binary::BinaryFrontend;
use crate::riverfront::config::conf;
use crate::riverfront::frontend::FrontendBase;
use crate::riverfront::http::{edgeql, graphql, notebook, system, ui};
use crate::riverfront::pool::{BackendPool, CompilerPool};
use crate::riverfront::{Error, Result};

const MAX_HEADERS: usize = 64;
/// Refuse to buffer an unbounded request body; payload semantics are out of
/// scope but a frontend still has to bound how much it will read.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// One parsed HTTP request: method/path/version plus headers and whatever
/// body bytes `Content-Length` declared.
struct HttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    fn wants_upgrade_to_binary(&self) -> bool {
        self.header("upgrade").map(|v| v.eq_ignore_ascii_case("edgedb-binary")).unwrap_or(false)
    }

    fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) => !v.eq_ignore_ascii_case("close"),
            None => true,
        }
    }
}

/// HTTP frontend (Component I): parses requests off the wire and routes
/// them to the edgeql/notebook/graphql/system/ui handlers, or upgrades the
/// connection to `BinaryFrontend` on request.
pub struct HttpMux<P: CompilerPool, B: BackendPool> {
    base: Arc<FrontendBase>,
    compiler: Arc<P>,
    backend_pool: Arc<B>,
    scram_store: Arc<dyn ScramVerifierStore>,
    jwt_store: Arc<dyn JwtKeyStore>,
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> HttpMux<P, B> {
    pub fn new(
        base: Arc<FrontendBase>,
        compiler: Arc<P>,
        backend_pool: Arc<B>,
        scram_store: Arc<dyn ScramVerifierStore>,
        jwt_store: Arc<dyn JwtKeyStore>,
    ) -> Self {
        HttpMux { base, compiler, backend_pool, scram_store, jwt_store }
    }

    /// Drives the connection: reads and handles requests one at a time
    /// until the client closes or sends `Connection: close`, or upgrades
    /// to the binary wire partway through (§4.I).
    pub async fn run(mut self, leading: Bytes) -> Result<()> {
        let mut buf = BytesMut::with_capacity(conf().recv_buffer_size as usize);
        buf.extend_from_slice(&leading);

        loop {
            let (request, consumed) = self.read_request(&mut buf).await?;
            buf.advance(consumed);

            if request.wants_upgrade_to_binary() {
                self.base.write(upgrade_response())?;
                self.base.flush().await?;
                let remaining = Bytes::from(buf);
                return BinaryFrontend::new(
                    self.base.clone(),
                    self.compiler.clone(),
                    self.backend_pool.clone(),
                    self.scram_store.clone(),
                    self.jwt_store.clone(),
                )
                .run(remaining)
                .await;
            }

            let keep_alive = request.keep_alive();
            let response = self.dispatch(&request).await;
            self.base.write(response)?;
            self.base.flush().await?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    /// Reads off the socket until a full request (headers, plus body if
    /// `Content-Length` names one) is buffered, then parses it. Returns the
    /// parsed request and how many bytes of `buf` it consumed.
    async fn read_request(&self, buf: &mut BytesMut) -> Result<(HttpRequest, usize)> {
        let header_len = loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(buf.chunk()) {
                Ok(httparse::Status::Complete(n)) => break n,
                Ok(httparse::Status::Partial) => {
                    self.base.read_until(buf, |_| false).await.map_err(|_| Error::closed())?;
                    // read_until above only returns once more bytes arrive or
                    // the predicate is satisfied; since it never is, a
                    // single extra read is enough before retrying parse.
                }
                Err(e) => return Err(Error::protocol_violation(format!("malformed HTTP request: {}", e))),
            }
            if buf.len() > MAX_HEADERS * 256 {
                return Err(Error::protocol_violation("HTTP headers too large"));
            }
        };

        let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers_buf);
        req.parse(buf.chunk()).map_err(|e| Error::protocol_violation(format!("malformed HTTP request: {}", e)))?;

        let method = req.method.unwrap_or("GET").to_string();
        let path = req.path.unwrap_or("/").to_string();
        let headers: Vec<(String, String)> = req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
            .collect();

        let content_length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse().ok())
            .unwrap_or(0);
        if content_length > MAX_BODY_BYTES {
            return Err(Error::protocol_violation("HTTP body too large"));
        }

        let total = header_len + content_length;
        while buf.len() < total {
            self.base.read_until(buf, |b| b.len() >= total).await?;
        }

        let body = Bytes::copy_from_slice(&buf.chunk()[header_len..total]);
        Ok((HttpRequest { method, path, headers, body }, total))
    }

    /// Routes a parsed request per the §4.I table, returning a fully
    /// framed HTTP response.
    async fn dispatch(&self, request: &HttpRequest) -> Bytes {
        let path = request.path.split('?').next().unwrap_or("/");
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let outcome = match segments.as_slice() {
            ["db", name, "edgeql", ..] => edgeql::handle(&self.compiler, &self.backend_pool, name, request.method.as_str(), &request.body, path).await,
            ["db", name, "notebook", ..] => notebook::handle(&self.compiler, &self.backend_pool, name, &request.body).await,
            ["db", name, "graphql", ..] => graphql::handle(name, &request.body).await,
            ["server", rest @ ..] => system::handle(rest).await,
            ["ui", rest @ ..] => ui::serve(rest).await,
            _ => Err(RouteError::NotFound),
        };

        match outcome {
            Ok(body) => json_response(200, &body),
            Err(RouteError::NotFound) => text_response(404, "not found"),
            Err(RouteError::BadRequest(msg)) => json_response(400, &crate::riverfront::http::error_envelope(msg)),
            Err(RouteError::Internal(e)) => json_response(500, &crate::riverfront::http::error_envelope(e.to_string())),
        }
    }
}

/// Error outcome of a route handler, mapped to an HTTP status by `dispatch`.
pub enum RouteError {
    NotFound,
    BadRequest(String),
    Internal(Error),
}

impl From<Error> for RouteError {
    fn from(e: Error) -> Self {
        RouteError::Internal(e)
    }
}

fn upgrade_response() -> Bytes {
    Bytes::from_static(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: edgedb-binary\r\nConnection: Upgrade\r\n\r\n")
}

fn json_response(status: u16, body: &serde_json::Value) -> Bytes {
    let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    frame_response(status, "application/json", &payload)
}

fn text_response(status: u16, body: &str) -> Bytes {
    frame_response(status, "text/plain; charset=utf-8", body.as_bytes())
}

fn frame_response(status: u16, content_type: &str, payload: &[u8]) -> Bytes {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status,
        reason,
        content_type,
        payload.len(),
    );
    let mut out = BytesMut::with_capacity(head.len() + payload.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_detection() {
        let req = HttpRequest {
            method: "GET".into(),
            path: "/".into(),
            headers: vec![("Upgrade".into(), "edgedb-binary".into())],
            body: Bytes::new(),
        };
        assert!(req.wants_upgrade_to_binary());
    }

    #[test]
    fn keep_alive_defaults_true() {
        let req = HttpRequest { method: "GET".into(), path: "/".into(), headers: vec![], body: Bytes::new() };
        assert!(req.keep_alive());
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let req = HttpRequest {
            method: "GET".into(),
            path: "/".into(),
            headers: vec![("Connection".into(), "close".into())],
            body: Bytes::new(),
        };
        assert!(!req.keep_alive());
    }
}
