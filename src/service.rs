//! Quorum Service
//!
//! Runs a [`QuorumEngine`] on a single tokio task. Membership changes,
//! deliveries, client requests, timer firings and reloads all arrive on one
//! channel and are applied in order.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{QuorumSettings, WolfQuorumConfig};
use crate::error::{Error, Result};
use crate::network::IpcEvent;
use crate::protocol::ExecMessage;
use crate::quorum::{
    ConfigChange, ConfigurationKind, GroupTransport, QuorumEngine, QuorumHost, RingId,
    TimerHandle, TimerKind, TimerService,
};
use crate::state::NodeId;

/// Verdict published to the host process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuorumStatus {
    pub quorate: bool,
    pub members: Vec<NodeId>,
    pub ring_id: RingId,
}

/// Events consumed by the engine task
#[derive(Debug)]
pub enum EngineEvent {
    /// Membership view from the group transport
    ConfigChange(ConfigChange),
    /// Exec message delivered by the group transport
    Deliver { from: NodeId, payload: Vec<u8> },
    /// Local client activity
    Ipc(IpcEvent),
    /// A scheduled timer fired
    Timer { kind: TimerKind, handle: TimerHandle },
    /// Configuration reloaded
    Reload(QuorumSettings),
}

/// Timers backed by tokio sleeps that post back to the engine task
struct TokioTimers {
    events: mpsc::UnboundedSender<EngineEvent>,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
    next_handle: u64,
}

impl TimerService for TokioTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if events.send(EngineEvent::Timer { kind, handle }).is_err() {
                tracing::warn!("Engine gone, dropping {:?} timer", kind);
            }
        });
        self.tasks.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

/// Standalone transport: every broadcast is delivered straight back to us
struct LoopbackTransport {
    local_id: NodeId,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl GroupTransport for LoopbackTransport {
    fn broadcast(&mut self, message: &ExecMessage) -> Result<()> {
        self.events
            .send(EngineEvent::Deliver {
                from: self.local_id,
                payload: message.encode(),
            })
            .map_err(|_| Error::Broadcast("engine task has stopped".into()))
    }
}

/// Publishes verdicts on a watch channel
struct WatchHost(watch::Sender<QuorumStatus>);

impl QuorumHost for WatchHost {
    fn quorum_changed(&mut self, members: &[NodeId], quorate: bool, ring_id: RingId) {
        tracing::debug!(
            "Quorum verdict: quorate={} members={:?} ring={}",
            quorate,
            members,
            ring_id
        );
        self.0.send_replace(QuorumStatus {
            quorate,
            members: members.to_vec(),
            ring_id,
        });
    }
}

/// Cloneable handle for feeding events to a running service
#[derive(Clone)]
pub struct ServiceHandle {
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ServiceHandle {
    fn send(&self, event: EngineEvent) -> Result<()> {
        self.events.send(event).map_err(|_| Error::ShuttingDown)
    }

    /// Deliver a membership view
    pub fn config_change(&self, change: ConfigChange) -> Result<()> {
        self.send(EngineEvent::ConfigChange(change))
    }

    /// Deliver an exec frame from `from`
    pub fn deliver(&self, from: NodeId, payload: Vec<u8>) -> Result<()> {
        self.send(EngineEvent::Deliver { from, payload })
    }

    /// Apply reloaded configuration keys
    pub fn reload(&self, settings: QuorumSettings) -> Result<()> {
        self.send(EngineEvent::Reload(settings))
    }
}

/// The quorum service
pub struct QuorumService {
    engine: QuorumEngine,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    ipc_tx: mpsc::UnboundedSender<IpcEvent>,
    ipc_rx: mpsc::UnboundedReceiver<IpcEvent>,
    status_rx: watch::Receiver<QuorumStatus>,
}

impl QuorumService {
    /// Build a standalone service from configuration
    pub fn new(config: &WolfQuorumConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ipc_tx, ipc_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(QuorumStatus::default());

        let engine = QuorumEngine::new(
            config.node.id,
            config.quorum.clone(),
            Box::new(LoopbackTransport {
                local_id: config.node.id,
                events: events_tx.clone(),
            }),
            Box::new(WatchHost(status_tx)),
            Box::new(TokioTimers {
                events: events_tx.clone(),
                tasks: HashMap::new(),
                next_handle: 0,
            }),
        );

        Self {
            engine,
            events_tx,
            events_rx,
            ipc_tx,
            ipc_rx,
            status_rx,
        }
    }

    /// Handle for feeding events into the service
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Sender for the IPC server
    pub fn ipc_sender(&self) -> mpsc::UnboundedSender<IpcEvent> {
        self.ipc_tx.clone()
    }

    /// Subscribe to quorum verdicts
    pub fn status(&self) -> watch::Receiver<QuorumStatus> {
        self.status_rx.clone()
    }

    /// Run until `shutdown` turns true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.engine.start();

        // Standalone: the only view we will ever see is ourselves
        let local_id = self.engine.node_id();
        self.engine.on_config_change(&ConfigChange {
            kind: ConfigurationKind::Regular,
            members: vec![local_id],
            left: Vec::new(),
            joined: vec![local_id],
            ring_id: RingId {
                rep: local_id,
                seq: 1,
            },
        });

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.dispatch(event),
                Some(event) = self.ipc_rx.recv() => self.dispatch(EngineEvent::Ipc(event)),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Quorum service stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ConfigChange(change) => self.engine.on_config_change(&change),
            EngineEvent::Deliver { from, payload } => {
                if let Err(e) = self.engine.deliver(from, &payload) {
                    tracing::warn!("Dropping exec message from node {}: {}", from, e);
                }
            }
            EngineEvent::Ipc(IpcEvent::Connected { conn, sink }) => {
                self.engine.connection_opened(conn, sink)
            }
            EngineEvent::Ipc(IpcEvent::Request {
                conn,
                request,
                reply,
            }) => {
                let response = self.engine.handle_request(conn, request);
                if reply.send(response).is_err() {
                    tracing::debug!("Connection {} went away before its reply", conn);
                }
            }
            EngineEvent::Ipc(IpcEvent::Disconnected { conn }) => {
                self.engine.connection_closed(conn)
            }
            EngineEvent::Timer { kind, handle } => self.engine.on_timer(kind, handle),
            EngineEvent::Reload(settings) => self.engine.reload_settings(settings),
        }
    }
}
