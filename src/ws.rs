//! Websocket upgrade handling for the shared listening socket.
//!
//! The dispatcher only performs the handshake; accepted streams are handed
//! to the embedder through the server's connection channel.

use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::http::{response, Body};
use crate::logger;

/// An accepted server-side websocket connection.
pub type WsStream = WebSocketStream<TokioIo<Upgraded>>;

/// True when the request carries the websocket upgrade handshake.
pub(crate) fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    header_has_token(req.headers(), "connection", "upgrade")
        && header_has_token(req.headers(), "upgrade", "websocket")
}

fn header_has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
}

/// Answer the handshake and complete the upgrade in the background. The
/// finished stream goes out on `tx`; a full channel drops the connection.
pub(crate) fn handle_upgrade<B>(
    mut req: Request<B>,
    tx: mpsc::Sender<WsStream>,
) -> Response<Body>
where
    B: Send + 'static,
{
    let Some(key) = req
        .headers()
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return response::with_headers(
            StatusCode::BAD_REQUEST,
            HeaderMap::new(),
            response::full_body(Bytes::from_static(b"Missing Sec-WebSocket-Key")),
        );
    };
    let accept = derive_accept_key(key.as_bytes());

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                if tx.send(stream).await.is_err() {
                    logger::warn("Websocket connection dropped: no receiver");
                }
            }
            Err(e) => logger::warn(&format!("Websocket upgrade failed: {e}")),
        }
    });

    let mut headers = HeaderMap::new();
    response::set_header(&mut headers, "upgrade", "websocket");
    response::set_header(&mut headers, "connection", "Upgrade");
    response::set_header(&mut headers, "sec-websocket-accept", &accept);
    response::with_headers(
        StatusCode::SWITCHING_PROTOCOLS,
        headers,
        response::empty_body(),
    )
}
