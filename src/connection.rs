//! Client connection: per-socket read loop, write loop, keepalive, and
//! backpressure.
//!
//! Two cooperating tasks per accepted socket: the read task decodes
//! frames and dispatches them, the write task drains a channel onto the
//! wire. The transport (an axum-upgraded WebSocket) already frames
//! messages for us, so the read side only needs a size check and a
//! deadline, not a byte-level decoder.
//!
//! The connection holds no back-pointer to the hub beyond the handle it
//! was given — register/unregister/broadcast flow through [`Hub`], never
//! the other way, which avoids a reference cycle between the two.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time;
use uuid::Uuid;

use crate::codec::Envelope;
use crate::config::Config;
use crate::error::WithConn;
use crate::hub::Hub;
use crate::protocol::{size_class_for, Dispatcher};

/// Accept one upgraded WebSocket, register it with `hub`, and run its
/// read/write loops until either terminates.
///
/// Assigns a fresh, opaque `hd1_id` — reconnection never resurrects an
/// old one, matching the invariant that no avatar persists across a
/// reconnect.
pub async fn handle_socket(socket: WebSocket, hub: Hub, config: Config) {
    let hd1_id = Uuid::new_v4().to_string();
    info!("{hd1_id}: connection accepted");

    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(config.outbound_queue_capacity);
    let (ws_tx, ws_rx) = socket.split();

    let dispatcher = Dispatcher::new(hub.clone(), hd1_id.clone(), outbound_tx.clone());

    let mut write_handle = tokio::spawn(write_loop(
        hd1_id.clone(),
        ws_tx,
        outbound_rx,
        config.clone(),
    ));
    let mut read_handle = tokio::spawn(read_loop(hd1_id.clone(), ws_rx, dispatcher, config));

    hub.register(
        hd1_id.clone(),
        outbound_tx,
        vec![write_handle.abort_handle(), read_handle.abort_handle()],
    )
    .await;

    // Whichever loop ends first means the connection is over; stop the
    // other rather than waiting for it to notice independently.
    tokio::select! {
        _ = &mut write_handle => { read_handle.abort(); }
        _ = &mut read_handle => { write_handle.abort(); }
    }

    hub.unregister(hd1_id.clone()).await;
    info!("{hd1_id}: connection terminated");
}

/// Read loop: one text frame in, one dispatch out. A decode error, a size
/// violation, an unexpected binary frame, or a read timeout all terminate
/// the loop — the hub is told via `unregister` by the caller, not here.
async fn read_loop(
    hd1_id: String,
    mut ws_rx: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    config: Config,
) {
    loop {
        let next = match time::timeout(config.pong_wait, ws_rx.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                warn!("{hd1_id}: socket error: {e}");
                return;
            }
            Ok(None) => {
                info!("{hd1_id}: socket closed by peer");
                return;
            }
            Err(_) => {
                warn!("{hd1_id}: read deadline exceeded ({:?})", config.pong_wait);
                return;
            }
        };

        match next {
            Message::Text(text) => {
                if let Err(e) = dispatch_frame(&hd1_id, &dispatcher, text.as_bytes()).await {
                    if e.is_fatal() {
                        warn!("{}; terminating connection", WithConn(&hd1_id, &e));
                        return;
                    }
                    debug!("{}; dropping message, connection stays up", WithConn(&hd1_id, &e));
                }
            }
            // Binary frames are reserved for the optional asset sidechannel
            // and are otherwise rejected — a client never originates one.
            Message::Binary(_) => {
                warn!("{hd1_id}: rejecting unexpected binary frame");
                return;
            }
            Message::Pong(_) => {
                debug!("{hd1_id}: pong received");
            }
            Message::Ping(_) => {
                // axum answers control pings at the protocol layer; nothing
                // for the application to do beyond having reset the read
                // deadline by looping back to the top.
            }
            Message::Close(_) => {
                info!("{hd1_id}: close frame received");
                return;
            }
        }
    }
}

async fn dispatch_frame(
    hd1_id: &str,
    dispatcher: &Dispatcher,
    raw: &[u8],
) -> Result<(), crate::error::HubError> {
    let kind = Envelope::peek_type(raw)?;
    let class = size_class_for(&kind);
    let envelope = Envelope::decode(raw, class)?;
    debug!("{hd1_id}: dispatching {}", envelope.kind);
    dispatcher.dispatch(envelope).await
}

/// Write loop: drains the bounded outbound queue onto the wire, and emits
/// a control ping every `ping_period` as the only liveness probe. A write
/// failure or deadline exceeded terminates the loop; so does the queue
/// closing, which happens when the hub evicts this connection as slow.
async fn write_loop(
    hd1_id: String,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    config: Config,
) {
    let mut ticker = time::interval(config.ping_period);
    ticker.tick().await; // first tick is immediate; consume it so pings are spaced by ping_period

    loop {
        tokio::select! {
            received = outbound_rx.recv() => {
                let Some(payload) = received else {
                    debug!("{hd1_id}: outbound queue closed");
                    return;
                };
                let text = match String::from_utf8(payload.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("{hd1_id}: outbound payload was not valid UTF-8: {e}");
                        continue;
                    }
                };
                if let Err(()) = write_one(&hd1_id, &mut ws_tx, Message::Text(text), &config).await {
                    return;
                }
            }
            _ = ticker.tick() => {
                if let Err(()) = write_one(&hd1_id, &mut ws_tx, Message::Ping(Vec::new()), &config).await {
                    return;
                }
            }
        }
    }
}

async fn write_one(
    hd1_id: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    config: &Config,
) -> Result<(), ()> {
    match time::timeout(config.write_wait, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!("{hd1_id}: write error: {e}");
            Err(())
        }
        Err(_) => {
            warn!("{hd1_id}: write deadline exceeded ({:?})", config.write_wait);
            Err(())
        }
    }
}
