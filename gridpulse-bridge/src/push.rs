//! WebSocket push channel.
//!
//! One hub subscription per socket. Frames flow one way (server to client);
//! inbound frames are ignored except for close.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::state::AppContext;

pub async fn ws_handler(ws: WebSocketUpgrade, State(context): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, context))
}

async fn handle_socket(socket: WebSocket, context: AppContext) {
    let (id, mut events) = context.hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                // Hub dropped the sender; bridge is shutting down.
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    context.hub.unsubscribe(id);
}
