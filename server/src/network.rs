//! Server network layer handling websocket transport and game loop
//! coordination.
//!
//! Connection tasks never touch simulation state: each one forwards decoded
//! frames as [`SessionEvent`]s over a channel, and the single `run` loop
//! interleaves those events with the fixed-period tick. That keeps the whole
//! simulation confined to one task with no locks.

use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use shared::protocol::DisconnectReason;
use shared::MAX_PAYLOAD_LEN;

use crate::controller::close_message;
use crate::game::Simulation;

/// Ticks longer than this are clamped to keep the integration stable after
/// a stall.
const MAX_TICK_DELTA_MS: f32 = 100.0;

/// Messages from connection tasks to the simulation loop.
#[derive(Debug)]
pub enum SessionEvent {
    Open {
        conn: u64,
        tx: UnboundedSender<Message>,
    },
    Frame {
        conn: u64,
        data: Vec<u8>,
    },
    Closed {
        conn: u64,
    },
}

/// Owns the listener, the simulation and the event channel between them.
pub struct Server {
    listener: Option<TcpListener>,
    tick_duration: Duration,
    sim: Simulation,
    /// Connection id to player slot, for routing inbound frames.
    slots: HashMap<u64, u8>,
    event_tx: UnboundedSender<SessionEvent>,
    event_rx: UnboundedReceiver<SessionEvent>,
}

impl Server {
    pub async fn new(addr: &str, tick_duration: Duration) -> Result<Server, Box<dyn Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", addr);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener: Some(listener),
            tick_duration,
            sim: Simulation::new(),
            slots: HashMap::new(),
            event_tx,
            event_rx,
        })
    }

    /// Main loop: spawns the acceptor, then interleaves session events with
    /// the tick interval, advancing the simulation by the measured delta.
    pub async fn run(&mut self) -> Result<(), Box<dyn Error>> {
        let Some(listener) = self.listener.take() else {
            return Err("server is already running".into());
        };
        tokio::spawn(accept_loop(listener, self.event_tx.clone()));

        let mut event_rx = std::mem::replace(&mut self.event_rx, mpsc::unbounded_channel().1);
        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!(
            "server started ({}ms tick)",
            self.tick_duration.as_millis()
        );

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let mut delta = now.duration_since(last_tick).as_secs_f32() * 1000.0;
                    last_tick = now;
                    if delta > MAX_TICK_DELTA_MS {
                        warn!("large tick delta ({:.1}ms), clamping", delta);
                        delta = MAX_TICK_DELTA_MS;
                    }
                    self.sim.tick(delta);
                }
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Open { conn, tx } => {
                if let Some(slot) = self.sim.connect(tx) {
                    self.slots.insert(conn, slot);
                }
            }
            SessionEvent::Frame { conn, data } => {
                if let Some(&slot) = self.slots.get(&conn) {
                    self.sim.handle_frame(slot, &data);
                }
            }
            SessionEvent::Closed { conn } => {
                if let Some(slot) = self.slots.remove(&conn) {
                    self.sim.disconnect(slot);
                }
            }
        }
    }
}

/// Accepts TCP connections forever, handing each to its own session task.
async fn accept_loop(listener: TcpListener, events: UnboundedSender<SessionEvent>) {
    let mut next_conn: u64 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_conn += 1;
                debug!("tcp connection {} from {}", next_conn, addr);
                tokio::spawn(run_session(next_conn, stream, events.clone()));
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
}

/// Per-connection task: completes the websocket handshake, spawns the
/// writer half over an unbounded outbound queue and forwards inbound binary
/// frames to the simulation loop. The protocol is binary-only; a text frame
/// or an oversized payload closes the connection with its distinct code.
async fn run_session(conn: u64, stream: TcpStream, events: UnboundedSender<SessionEvent>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake failed: {}", e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    if events
        .send(SessionEvent::Open {
            conn,
            tx: tx.clone(),
        })
        .is_err()
    {
        return;
    }

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                if data.len() > MAX_PAYLOAD_LEN {
                    let _ = tx.send(close_message(DisconnectReason::ProtocolError));
                    break;
                }
                if events.send(SessionEvent::Frame { conn, data }).is_err() {
                    break;
                }
            }
            Ok(Message::Text(_)) => {
                let _ = tx.send(close_message(DisconnectReason::BadRequest));
                break;
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong keepalives are answered by the library.
            Ok(_) => {}
            Err(e) => {
                debug!("connection {} read error: {}", conn, e);
                break;
            }
        }
    }

    let _ = events.send(SessionEvent::Closed { conn });
}
