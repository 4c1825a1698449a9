//! In-process mock rosbridge server for integration tests.
//!
//! Implements just enough of the protocol to exercise the client:
//! topic routing between connections (`subscribe`/`publish`), forwarding
//! of `call_service` to connections that sent `advertise_service`, and a
//! handful of builtin services (`/rosout/get_loggers`, the rosapi param
//! services, `/test/*` fixtures). Every inbound frame is recorded for
//! assertions.

// Each integration test binary compiles its own copy; not every binary
// uses every helper.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

type ConnTx = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct BridgeState {
    /// topic -> subscribed connections.
    subscribers: Mutex<HashMap<String, Vec<(usize, ConnTx)>>>,
    /// service -> connection hosting it.
    advertisers: Mutex<HashMap<String, (usize, ConnTx)>>,
    /// in-flight forwarded service calls, by correlation id.
    pending_calls: Mutex<HashMap<String, ConnTx>>,
    /// parameter store (JSON-encoded strings, as rosapi keeps them).
    params: Mutex<HashMap<String, String>>,
}

pub struct MockBridge {
    pub addr: SocketAddr,
    frames: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    kill_tx: broadcast::Sender<()>,
}

impl MockBridge {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let frames: Arc<Mutex<Vec<Value>>> = Arc::default();
        let connections = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(BridgeState::default());
        let (kill_tx, _) = broadcast::channel(4);

        let frames_clone = Arc::clone(&frames);
        let connections_clone = Arc::clone(&connections);
        let kill = kill_tx.clone();
        tokio::spawn(async move {
            let mut next_id = 0usize;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                next_id += 1;
                connections_clone.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    stream,
                    next_id,
                    Arc::clone(&state),
                    Arc::clone(&frames_clone),
                    kill.subscribe(),
                ));
            }
        });

        Self {
            addr,
            frames,
            connections,
            kill_tx,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Total connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Hard-drop every live connection (simulates a dying server).
    pub fn drop_connections(&self) {
        let _ = self.kill_tx.send(());
    }

    /// Snapshot of every frame received so far.
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }

    /// Frames of one op, optionally filtered by a field value.
    pub fn frames_with_op(&self, op: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| f["op"] == op)
            .collect()
    }

    /// Poll until `pred` holds over the frame log, or panic.
    pub async fn wait_for(&self, pred: impl Fn(&[Value]) -> bool, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if pred(&self.frames()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}; frames: {:#?}", self.frames());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Poll an arbitrary condition with a 5 s deadline.
pub async fn wait_until(pred: impl Fn() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_id: usize,
    state: Arc<BridgeState>,
    frames: Arc<Mutex<Vec<Value>>>,
    mut kill_rx: broadcast::Receiver<()>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            outgoing = conn_rx.recv() => match outgoing {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    frames.lock().unwrap().push(frame.clone());
                    handle_frame(&state, conn_id, &conn_tx, frame);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = kill_rx.recv() => break,
        }
    }

    // Forget everything this connection registered.
    state
        .subscribers
        .lock()
        .unwrap()
        .values_mut()
        .for_each(|subs| subs.retain(|(id, _)| *id != conn_id));
    state
        .advertisers
        .lock()
        .unwrap()
        .retain(|_, (id, _)| *id != conn_id);
}

fn handle_frame(state: &Arc<BridgeState>, conn_id: usize, conn_tx: &ConnTx, frame: Value) {
    match frame["op"].as_str() {
        Some("subscribe") => {
            if let Some(topic) = frame["topic"].as_str() {
                state
                    .subscribers
                    .lock()
                    .unwrap()
                    .entry(topic.to_string())
                    .or_default()
                    .push((conn_id, conn_tx.clone()));
            }
        }
        Some("unsubscribe") => {
            if let Some(topic) = frame["topic"].as_str() {
                if let Some(subs) = state.subscribers.lock().unwrap().get_mut(topic) {
                    subs.retain(|(id, _)| *id != conn_id);
                }
            }
        }
        Some("publish") => {
            let Some(topic) = frame["topic"].as_str() else {
                return;
            };
            let delivery = json!({
                "op": "publish",
                "topic": topic,
                "msg": frame["msg"],
            })
            .to_string();
            if let Some(subs) = state.subscribers.lock().unwrap().get(topic) {
                for (_, tx) in subs {
                    let _ = tx.send(delivery.clone());
                }
            }
        }
        Some("advertise_service") => {
            if let Some(service) = frame["service"].as_str() {
                state
                    .advertisers
                    .lock()
                    .unwrap()
                    .insert(service.to_string(), (conn_id, conn_tx.clone()));
            }
        }
        Some("unadvertise_service") => {
            if let Some(service) = frame["service"].as_str() {
                state.advertisers.lock().unwrap().remove(service);
            }
        }
        Some("call_service") => handle_call(state, conn_tx, &frame),
        Some("service_response") => {
            // A hosted service answered: route back to the caller.
            if let Some(id) = frame["id"].as_str() {
                if let Some(caller) = state.pending_calls.lock().unwrap().remove(id) {
                    let _ = caller.send(frame.to_string());
                }
            }
        }
        _ => {}
    }
}

fn handle_call(state: &Arc<BridgeState>, caller_tx: &ConnTx, frame: &Value) {
    let Some(service) = frame["service"].as_str() else {
        return;
    };
    let id = frame["id"].clone();
    let args = frame.get("args").cloned().unwrap_or_else(|| json!({}));

    // Services hosted by a connected client win over the builtins.
    let advertiser = state.advertisers.lock().unwrap().get(service).cloned();
    if let Some((_, host_tx)) = advertiser {
        if let Some(id) = id.as_str() {
            state
                .pending_calls
                .lock()
                .unwrap()
                .insert(id.to_string(), caller_tx.clone());
        }
        let _ = host_tx.send(frame.to_string());
        return;
    }

    let answer = match service {
        "/rosout/get_loggers" => Some((
            true,
            json!({"loggers": [
                {"name": "ros.roscpp", "level": "INFO"},
                {"name": "ros.roscpp.superdebug", "level": "WARN"},
            ]}),
        )),
        "/rosapi/get_param" => {
            let name = args["name"].as_str().unwrap_or_default();
            let value = state
                .params
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_default();
            Some((true, json!({"value": value})))
        }
        "/rosapi/set_param" => {
            let name = args["name"].as_str().unwrap_or_default().to_string();
            let value = args["value"].as_str().unwrap_or_default().to_string();
            state.params.lock().unwrap().insert(name, value);
            Some((true, json!({})))
        }
        "/rosapi/delete_param" => {
            let name = args["name"].as_str().unwrap_or_default();
            state.params.lock().unwrap().remove(name);
            Some((true, json!({})))
        }
        "/rosapi/get_param_names" => {
            let names: Vec<String> = state.params.lock().unwrap().keys().cloned().collect();
            Some((true, json!({"names": names})))
        }
        "/rosapi/topics" => {
            let topics: Vec<String> = state.subscribers.lock().unwrap().keys().cloned().collect();
            Some((true, json!({"topics": topics, "types": []})))
        }
        "/test/echo" => Some((true, args.clone())),
        "/test/fail" => Some((false, json!({"message": "deliberate failure"}))),
        // Never answered; used for timeout and disconnect tests.
        "/test/never" => None,
        _ => Some((false, json!({"message": format!("service {service} not found")}))),
    };

    if let Some((result, values)) = answer {
        let _ = caller_tx.send(
            json!({
                "op": "service_response",
                "id": id,
                "service": service,
                "result": result,
                "values": values,
            })
            .to_string(),
        );
    }
}
