//! The connection actor.
//!
//! One task owns the connection state, the pairing data, the open link and
//! the command queue. Caller requests and worker events (bytes read, write
//! failures, timer expiries) arrive over two channels and are handled one at
//! a time. Any error returned by a handler tears the session down.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::sync::Arc;

use chrono::{Datelike, Local, Timelike};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::PumpConfig;
use super::pump::{ConnectionLock, PumpStatus};
use super::queue::{CommandQueue, CommandRequest, NextStep, QueueState};
use crate::app::{
    ACTIVATE_SERVICE_RESPONSE_LENGTH, AppResponse, BIND_RESPONSE_LENGTH, CONNECT_RESPONSE_LENGTH,
    DISCONNECT_RESPONSE_LENGTH, SERVICE_CHALLENGE_RESPONSE_LENGTH, Service, activate_service_request,
    bind_request, check_response, connect_request, disconnect_request, encode_request,
    expect_success, service_challenge_request,
};
use crate::core::{
    APP_ACTIVATE_SERVICE, APP_BIND, APP_CONNECT, APP_DISCONNECT, APP_SERVICE_CHALLENGE,
    AppLayerError, COMM_ID_CONNECTION_REQUEST, COMM_ID_KEY_REQUEST, CommandError, ConnectionState,
    FrameError, HANDSHAKE_RANDOM_SIZE, KEY_EXCHANGE_BLOB_OFFSET, KEY_EXCHANGE_PAYLOAD_SIZE,
    PAIRING_CONFIRMED, PAIRING_PENDING, PAIRING_REJECTED, PumpError, SatlErrorCode, SessionError,
    SessionResult,
};
use crate::crypto::{KeyPair, derive_keys, service_password_hash};
use crate::storage::PairingStore;
use crate::transport::{
    FrameBuffer, Link, LinkEvent, PairingData, SatlCommand, SatlPacket, encode_packet, read_loop,
    transcript, write_loop,
};

/// Requests from [`InsightPump`](super::InsightPump) handles.
pub(crate) enum Request {
    RequestConnection(ConnectionLock),
    WithdrawConnection(ConnectionLock),
    Enqueue(CommandRequest),
    Subscribe(oneshot::Sender<mpsc::UnboundedReceiver<ConnectionState>>),
    VerificationCode(oneshot::Sender<Option<String>>),
    ConfirmCode(oneshot::Sender<Result<(), PumpError>>),
    RejectCode(oneshot::Sender<Result<(), PumpError>>),
    Status(oneshot::Sender<PumpStatus>),
    PairingData(oneshot::Sender<Option<PairingData>>),
    Shutdown(oneshot::Sender<()>),
}

/// Results reported by worker tasks, tagged with the job that produced them.
pub(crate) enum Event<S> {
    RadioEnabled { job: u64, result: io::Result<bool> },
    LinkOpened { job: u64, stream: S },
    LinkOpenFailed { job: u64, error: io::Error },
    Link { job: u64, event: LinkEvent },
    WriteFailed { job: u64, error: io::Error },
    TimeoutFired { job: u64 },
    HeartbeatFired { job: u64 },
    RecoveryFired { job: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum JobKind {
    EnableRadio,
    Connect,
    Read,
    Write,
    Timeout,
    Heartbeat,
    Recovery,
}

/// Running worker tasks, at most one per kind.
///
/// Ids are never reused, so an event whose id no longer matches its slot
/// belongs to a cancelled job or a torn-down session.
#[derive(Debug, Default)]
struct Jobs {
    last_id: u64,
    running: HashMap<JobKind, (u64, JoinHandle<()>)>,
}

impl Jobs {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert(&mut self, kind: JobKind, id: u64, handle: JoinHandle<()>) {
        if let Some((_, previous)) = self.running.insert(kind, (id, handle)) {
            previous.abort();
        }
    }

    fn is_current(&self, kind: JobKind, id: u64) -> bool {
        matches!(self.running.get(&kind), Some((current, _)) if *current == id)
    }

    /// Forget a job that reported its result. Returns false for stale ids.
    fn finish(&mut self, kind: JobKind, id: u64) -> bool {
        if self.is_current(kind, id) {
            self.running.remove(&kind);
            true
        } else {
            false
        }
    }

    fn cancel(&mut self, kind: JobKind) {
        if let Some((_, handle)) = self.running.remove(&kind) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.running.drain() {
            handle.abort();
        }
    }
}

/// Local time packed as in `KEY_REQUEST`: second, minute << 6, hour << 12,
/// day << 17, month << 22, two-digit year << 26.
fn packed_timestamp<T: Datelike + Timelike>(time: &T) -> u32 {
    time.second()
        | time.minute() << 6
        | time.hour() << 12
        | time.day() << 17
        | time.month() << 22
        | (time.year().rem_euclid(100) as u32) << 26
}

pub(crate) struct Handles<L: Link> {
    config: PumpConfig,
    link: Arc<L>,
    store: Box<dyn PairingStore>,
    events: mpsc::UnboundedSender<Event<L::Stream>>,

    state: ConnectionState,
    is_paired: bool,
    pairing: Option<PairingData>,
    last_failure: Option<Arc<SessionError>>,

    // Pairing handshake, dropped on cleanup
    key_pair: Option<KeyPair>,
    local_random: Option<[u8; HANDSHAKE_RANDOM_SIZE]>,
    key_request: Option<Vec<u8>>,
    verification_code: Option<String>,

    queue: CommandQueue,
    locks: HashSet<ConnectionLock>,
    observers: Vec<mpsc::UnboundedSender<ConnectionState>>,

    buffer: FrameBuffer,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    jobs: Jobs,
}

impl<L: Link> Handles<L> {
    pub(crate) fn new(
        link: Arc<L>,
        config: PumpConfig,
        store: Box<dyn PairingStore>,
        pairing: Option<PairingData>,
        events: mpsc::UnboundedSender<Event<L::Stream>>,
    ) -> Self {
        let buffer = FrameBuffer::new(config.buffer_capacity);
        Self {
            config,
            link,
            store,
            events,
            state: ConnectionState::Disconnected,
            is_paired: pairing.is_some(),
            pairing,
            last_failure: None,
            key_pair: None,
            local_random: None,
            key_request: None,
            verification_code: None,
            queue: CommandQueue::new(),
            locks: HashSet::new(),
            observers: Vec::new(),
            buffer,
            writer: None,
            jobs: Jobs::default(),
        }
    }

    /// Run until shutdown or until every handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut events: mpsc::UnboundedReceiver<Event<L::Stream>>,
    ) {
        info!(paired = self.is_paired, "connection task started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        info!("connection task stopped");
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::RequestConnection(lock) => {
                info!(?lock, "connection requested");
                self.locks.insert(lock);
                if self.state == ConnectionState::Disconnected {
                    let result = self.connect_or_enable();
                    self.check(result);
                }
            }
            Request::WithdrawConnection(lock) => {
                info!(?lock, "connection request withdrawn");
                self.locks.remove(&lock);
                if self.locks.is_empty() {
                    if self.state == ConnectionState::Connected && self.queue.is_idle() {
                        let result = self.send_disconnect();
                        self.check(result);
                    } else if self.state != ConnectionState::Disconnected {
                        self.cleanup();
                        self.fallback(ConnectionState::Disconnected);
                    }
                }
            }
            Request::Enqueue(request) => {
                if self.state != ConnectionState::Connected {
                    debug!(command = request.name(), state = %self.state, "rejecting command");
                    request.complete(Err(CommandError::NotConnected));
                    return;
                }
                debug!(command = request.name(), queued = self.queue.len(), "command queued");
                self.queue.push(request);
                if self.queue.is_idle() {
                    let result = self.send_next();
                    self.check(result);
                }
            }
            Request::Subscribe(reply) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(self.state);
                self.observers.push(tx);
                let _ = reply.send(rx);
            }
            Request::VerificationCode(reply) => {
                let code = match self.state {
                    ConnectionState::WaitingForCodeConfirmation => self.verification_code.clone(),
                    _ => None,
                };
                let _ = reply.send(code);
            }
            Request::ConfirmCode(reply) => {
                if self.state != ConnectionState::WaitingForCodeConfirmation {
                    let _ = reply.send(Err(PumpError::WrongState(self.state)));
                    return;
                }
                info!("verification code confirmed by operator");
                self.verification_code = None;
                let result = self.send_verify_confirm();
                self.check(result);
                let _ = reply.send(Ok(()));
            }
            Request::RejectCode(reply) => {
                if self.state != ConnectionState::WaitingForCodeConfirmation {
                    let _ = reply.send(Err(PumpError::WrongState(self.state)));
                    return;
                }
                info!("verification code rejected by operator");
                self.cleanup();
                self.last_failure = Some(Arc::new(SessionError::PairingRejected));
                self.fallback(ConnectionState::Disconnected);
                let _ = reply.send(Ok(()));
            }
            Request::Status(reply) => {
                let _ = reply.send(PumpStatus {
                    state: self.state,
                    is_paired: self.is_paired,
                    last_failure: self.last_failure.clone(),
                });
            }
            Request::PairingData(reply) => {
                let _ = reply.send(self.pairing.clone());
            }
            Request::Shutdown(reply) => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    // ========================================================================
    // Worker events
    // ========================================================================

    fn handle_event(&mut self, event: Event<L::Stream>) {
        let result = match event {
            Event::RadioEnabled { job, result } => {
                if !self.jobs.finish(JobKind::EnableRadio, job) {
                    return self.stale("radio enabled");
                }
                match result {
                    Ok(true) => {
                        info!("radio enabled");
                        self.connect()
                    }
                    Ok(false) => Err(SessionError::RadioUnavailable),
                    Err(e) => Err(SessionError::Io(e)),
                }
            }
            Event::LinkOpened { job, stream } => {
                if !self.jobs.finish(JobKind::Connect, job) {
                    return self.stale("link opened");
                }
                self.on_link_opened(stream)
            }
            Event::LinkOpenFailed { job, error } => {
                if !self.jobs.finish(JobKind::Connect, job) {
                    return self.stale("link open failure");
                }
                Err(SessionError::Io(error))
            }
            Event::Link { job, event } => {
                if !self.jobs.is_current(JobKind::Read, job) {
                    return self.stale("link read");
                }
                match event {
                    LinkEvent::Received(bytes) => self.on_bytes(&bytes),
                    LinkEvent::Failed(None) => Err(SessionError::LinkClosed),
                    LinkEvent::Failed(Some(e)) => Err(SessionError::Io(e)),
                }
            }
            Event::WriteFailed { job, error } => {
                if !self.jobs.is_current(JobKind::Write, job) {
                    return self.stale("link write failure");
                }
                Err(SessionError::Io(error))
            }
            Event::TimeoutFired { job } => {
                if !self.jobs.finish(JobKind::Timeout, job) {
                    return self.stale("timeout");
                }
                Err(SessionError::Timeout)
            }
            Event::HeartbeatFired { job } => {
                if !self.jobs.finish(JobKind::Heartbeat, job) {
                    return self.stale("verification heartbeat");
                }
                self.send_verify_confirm()
            }
            Event::RecoveryFired { job } => {
                if !self.jobs.finish(JobKind::Recovery, job) {
                    return self.stale("recovery");
                }
                if self.state != ConnectionState::Recovering {
                    return;
                }
                info!("recovering connection");
                self.connect_or_enable()
            }
        };
        self.check(result);
    }

    fn stale(&self, what: &str) {
        warn!(event = what, state = %self.state, "ignoring stale event");
    }

    fn check(&mut self, result: SessionResult<()>) {
        if let Err(e) = result {
            self.fail(e);
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    fn set_state(&mut self, next: ConnectionState) -> SessionResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.apply_state(next);
        Ok(())
    }

    /// `Disconnected` and `Recovering` are reachable from everywhere.
    fn fallback(&mut self, next: ConnectionState) {
        debug_assert!(matches!(
            next,
            ConnectionState::Disconnected | ConnectionState::Recovering
        ));
        self.apply_state(next);
    }

    fn apply_state(&mut self, next: ConnectionState) {
        info!(from = %self.state, to = %next, "connection state changed");
        self.state = next;

        let before = self.observers.len();
        self.observers.retain(|tx| tx.send(next).is_ok());
        let dropped = before - self.observers.len();
        if dropped > 0 {
            debug!(dropped, "removed closed state observers");
        }
    }

    fn expect_state(&self, expected: ConnectionState, message: &'static str) -> SessionResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::WrongState {
                message,
                state: self.state,
            })
        }
    }

    /// Tear the session down after a fatal error.
    fn fail(&mut self, error: SessionError) {
        error!(state = %self.state, error = %error, "session failed");
        self.cleanup();
        let recover = self.is_paired && !self.locks.is_empty();
        self.last_failure = Some(Arc::new(error));
        if recover {
            self.recover();
        } else {
            self.fallback(ConnectionState::Disconnected);
        }
    }

    fn recover(&mut self) {
        let delay = self.config.recovery_delay;
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnection");
        self.fallback(ConnectionState::Recovering);
        let events = self.events.clone();
        self.spawn_job(JobKind::Recovery, move |job| async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RecoveryFired { job });
        });
    }

    /// Release everything tied to the current link. Idempotent.
    fn cleanup(&mut self) {
        debug!(state = %self.state, "cleaning up session");
        self.jobs.cancel_all();
        self.writer = None;
        self.buffer.clear();
        if !self.is_paired {
            self.pairing = None;
        }
        self.key_pair = None;
        self.local_random = None;
        self.key_request = None;
        self.verification_code = None;
        self.queue.reset(CommandError::NotConnected);
    }

    fn shutdown(&mut self) {
        info!("shutting down connection task");
        self.cleanup();
        self.locks.clear();
        if self.state != ConnectionState::Disconnected {
            self.fallback(ConnectionState::Disconnected);
        }
        self.observers.clear();
    }

    fn persist(&mut self) {
        if !self.is_paired {
            return;
        }
        if let Some(pairing) = &self.pairing {
            if let Err(e) = self.store.save(pairing.clone()) {
                warn!(error = %e, "failed to persist pairing data");
            }
        }
    }

    // ========================================================================
    // Link
    // ========================================================================

    fn spawn_job<F, Fut>(&mut self, kind: JobKind, task: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.jobs.next_id();
        let handle = tokio::spawn(task(id));
        self.jobs.insert(kind, id, handle);
    }

    fn connect_or_enable(&mut self) -> SessionResult<()> {
        if self.link.is_radio_enabled() {
            return self.connect();
        }
        self.set_state(ConnectionState::EnablingRadio)?;
        let link = self.link.clone();
        let events = self.events.clone();
        self.spawn_job(JobKind::EnableRadio, move |job| async move {
            let result = link.enable_radio().await;
            let _ = events.send(Event::RadioEnabled { job, result });
        });
        Ok(())
    }

    fn connect(&mut self) -> SessionResult<()> {
        self.set_state(ConnectionState::Connecting)?;
        let link = self.link.clone();
        let events = self.events.clone();
        self.spawn_job(JobKind::Connect, move |job| async move {
            let event = match link.open().await {
                Ok(stream) => Event::LinkOpened { job, stream },
                Err(error) => Event::LinkOpenFailed { job, error },
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn on_link_opened(&mut self, stream: L::Stream) -> SessionResult<()> {
        self.expect_state(ConnectionState::Connecting, "open link")?;
        info!("link open");

        let (reader, writer) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let chunk_size = self.config.read_chunk_size;

        let events = self.events.clone();
        self.spawn_job(JobKind::Read, move |job| {
            read_loop(reader, chunk_size, move |event| {
                events.send(Event::Link { job, event }).is_ok()
            })
        });
        let events = self.events.clone();
        self.spawn_job(JobKind::Write, move |job| {
            write_loop(writer, write_rx, move |error| {
                let _ = events.send(Event::WriteFailed { job, error });
            })
        });
        self.writer = Some(write_tx);

        if self.is_paired {
            self.set_state(ConnectionState::SynRequest)?;
            self.send_keyed(SatlCommand::SynRequest, &[])
        } else {
            self.set_state(ConnectionState::ConnectionRequest)?;
            let packet =
                encode_packet(SatlCommand::ConnectionRequest, COMM_ID_CONNECTION_REQUEST, &[], None)?;
            self.transmit(packet)
        }
    }

    fn arm_timeout(&mut self) {
        let timeout = self.config.response_timeout;
        let events = self.events.clone();
        self.spawn_job(JobKind::Timeout, move |job| async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(Event::TimeoutFired { job });
        });
    }

    fn transmit(&mut self, packet: Vec<u8>) -> SessionResult<()> {
        debug!(packet = %hex::encode(&packet), "sending SATL packet");
        let writer = self.writer.as_ref().ok_or(SessionError::LinkClosed)?;
        writer.send(packet).map_err(|_| SessionError::LinkClosed)?;
        self.arm_timeout();
        Ok(())
    }

    fn send_keyed(&mut self, command: SatlCommand, payload: &[u8]) -> SessionResult<()> {
        let pairing = self.pairing.as_mut().ok_or(SessionError::WrongState {
            message: "keyed send",
            state: self.state,
        })?;
        let packet = pairing.seal(command, payload)?;
        self.persist();
        self.transmit(packet)
    }

    fn send_data(&mut self, message: Vec<u8>) -> SessionResult<()> {
        debug!(message = %hex::encode(&message), "sending application message");
        self.send_keyed(SatlCommand::Data, &message)
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    fn on_bytes(&mut self, bytes: &[u8]) -> SessionResult<()> {
        self.buffer.push(bytes)?;
        while let Some(packet) = self.buffer.next_packet()? {
            self.jobs.cancel(JobKind::Timeout);
            self.process_packet(packet)?;
        }
        if !self.buffer.is_empty() {
            debug!(buffered = self.buffer.position(), "partial packet buffered");
            self.arm_timeout();
        }
        Ok(())
    }

    fn process_packet(&mut self, bytes: Vec<u8>) -> SessionResult<()> {
        debug!(packet = %hex::encode(&bytes), "received SATL packet");
        let packet = SatlPacket::parse(bytes)?;
        let command = packet.command()?;

        let payload = match self.pairing.as_mut() {
            Some(pairing) => pairing.open(&packet)?,
            None => packet.open_unkeyed()?,
        };
        self.persist();

        match command {
            SatlCommand::ConnectionResponse => self.on_connection_response(&payload),
            SatlCommand::KeyResponse => self.on_key_response(&packet, &payload),
            SatlCommand::VerifyDisplayResponse => self.on_verify_display_response(&payload),
            SatlCommand::VerifyConfirmResponse => self.on_verify_confirm_response(&payload),
            SatlCommand::SynAckResponse => self.on_syn_ack(&payload),
            SatlCommand::Error => Err(error_frame(&payload)),
            SatlCommand::Data => self.on_data(&payload),
            other => Err(FrameError::UnknownCommand(other.as_byte()).into()),
        }
    }

    // ========================================================================
    // Pairing
    // ========================================================================

    fn on_connection_response(&mut self, payload: &[u8]) -> SessionResult<()> {
        info!("received CONNECTION_RESPONSE");
        if payload.len() != 1 {
            return Err(FrameError::InvalidPayloadLength.into());
        }
        if payload[0] != 0 {
            return Err(SessionError::IncompatibleVersion);
        }
        self.expect_state(ConnectionState::ConnectionRequest, "CONNECTION_RESPONSE")?;

        let key_pair = KeyPair::generate()?;
        let mut random = [0u8; HANDSHAKE_RANDOM_SIZE];
        OsRng.fill_bytes(&mut random);

        let mut body = Vec::with_capacity(KEY_EXCHANGE_PAYLOAD_SIZE);
        body.extend_from_slice(&random);
        body.extend_from_slice(&packed_timestamp(&Local::now()).to_le_bytes());
        body.extend_from_slice(&key_pair.modulus());

        self.set_state(ConnectionState::KeyRequest)?;
        let packet = encode_packet(SatlCommand::KeyRequest, COMM_ID_KEY_REQUEST, &body, None)?;
        self.key_request = Some(transcript(&packet).to_vec());
        self.key_pair = Some(key_pair);
        self.local_random = Some(random);
        self.transmit(packet)
    }

    fn on_key_response(&mut self, packet: &SatlPacket, payload: &[u8]) -> SessionResult<()> {
        info!("received KEY_RESPONSE");
        if payload.len() != KEY_EXCHANGE_PAYLOAD_SIZE {
            return Err(FrameError::InvalidPayloadLength.into());
        }
        self.expect_state(ConnectionState::KeyRequest, "KEY_RESPONSE")?;

        let (Some(key_pair), Some(key_request), Some(local_random)) = (
            self.key_pair.take(),
            self.key_request.take(),
            self.local_random.take(),
        ) else {
            return Err(SessionError::WrongState {
                message: "KEY_RESPONSE without key request",
                state: self.state,
            });
        };
        let keys = derive_keys(
            &key_pair,
            &key_request,
            packet.transcript(),
            &payload[KEY_EXCHANGE_BLOB_OFFSET..],
            &local_random,
            &payload[..HANDSHAKE_RANDOM_SIZE],
        )?;

        debug!(comm_id = packet.comm_id(), "session keys derived");
        self.pairing = Some(PairingData::new(packet.comm_id(), keys.incoming, keys.outgoing));
        self.verification_code = Some(keys.verification_code);

        self.set_state(ConnectionState::VerifyDisplayRequest)?;
        self.send_keyed(SatlCommand::VerifyDisplayRequest, &[])
    }

    fn on_verify_display_response(&mut self, payload: &[u8]) -> SessionResult<()> {
        info!("received VERIFY_DISPLAY_RESPONSE");
        if !payload.is_empty() {
            return Err(FrameError::InvalidPayloadLength.into());
        }
        self.expect_state(ConnectionState::VerifyDisplayRequest, "VERIFY_DISPLAY_RESPONSE")?;
        self.set_state(ConnectionState::WaitingForCodeConfirmation)
    }

    fn send_verify_confirm(&mut self) -> SessionResult<()> {
        self.set_state(ConnectionState::VerifyConfirmRequest)?;
        self.send_keyed(SatlCommand::VerifyConfirmRequest, &PAIRING_CONFIRMED.to_le_bytes())
    }

    fn on_verify_confirm_response(&mut self, payload: &[u8]) -> SessionResult<()> {
        if payload.len() != 2 {
            return Err(FrameError::InvalidPayloadLength.into());
        }
        self.expect_state(ConnectionState::VerifyConfirmRequest, "VERIFY_CONFIRM_RESPONSE")?;
        self.jobs.cancel(JobKind::Heartbeat);

        match u16::from_le_bytes([payload[0], payload[1]]) {
            PAIRING_CONFIRMED => {
                info!("verification code confirmed by pump");
                self.set_state(ConnectionState::AppBind)?;
                self.send_data(bind_request(&self.config.model_number))
            }
            PAIRING_REJECTED => Err(SessionError::PairingRejected),
            PAIRING_PENDING => {
                let interval = self.config.verification_heartbeat;
                info!(interval_ms = interval.as_millis() as u64, "verification still pending");
                let events = self.events.clone();
                self.spawn_job(JobKind::Heartbeat, move |job| async move {
                    tokio::time::sleep(interval).await;
                    let _ = events.send(Event::HeartbeatFired { job });
                });
                Ok(())
            }
            status => Err(SessionError::InvalidPairingStatus(status)),
        }
    }

    fn on_syn_ack(&mut self, payload: &[u8]) -> SessionResult<()> {
        info!("received SYN_ACK_RESPONSE");
        if !payload.is_empty() {
            return Err(FrameError::InvalidPayloadLength.into());
        }
        self.expect_state(ConnectionState::SynRequest, "SYN_ACK_RESPONSE")?;
        self.set_state(ConnectionState::AppConnect)?;
        self.send_data(connect_request())
    }

    fn on_paired(&mut self) {
        info!("pairing completed");
        self.is_paired = true;
        if let Some(pairing) = &self.pairing {
            if let Err(e) = self.store.save(pairing.clone()) {
                warn!(error = %e, "failed to persist pairing data");
            }
        }
        if let Err(e) = self.store.set_paired(true) {
            warn!(error = %e, "failed to persist pairing flag");
        }
    }

    // ========================================================================
    // Application layer
    // ========================================================================

    fn on_data(&mut self, payload: &[u8]) -> SessionResult<()> {
        debug!(message = %hex::encode(payload), "received application message");
        match self.state {
            ConnectionState::AppBind => {
                expect_success(payload, APP_BIND, BIND_RESPONSE_LENGTH)?;
                self.on_paired();
                self.set_state(ConnectionState::Connected)
            }
            ConnectionState::AppConnect => {
                expect_success(payload, APP_CONNECT, CONNECT_RESPONSE_LENGTH)?;
                self.set_state(ConnectionState::Connected)
            }
            ConnectionState::AppDisconnect => {
                expect_success(payload, APP_DISCONNECT, DISCONNECT_RESPONSE_LENGTH)?;
                self.reconnect_if_requested()
            }
            ConnectionState::Connected => self.on_command_data(payload),
            state => Err(SessionError::WrongState {
                message: "DATA",
                state,
            }),
        }
    }

    fn head_service(&self, message: &'static str) -> SessionResult<Service> {
        self.queue.head().map(|head| head.service()).ok_or(SessionError::WrongState {
            message,
            state: self.state,
        })
    }

    fn on_command_data(&mut self, payload: &[u8]) -> SessionResult<()> {
        match self.queue.state() {
            QueueState::ServiceChallenge => {
                let salt =
                    expect_success(payload, APP_SERVICE_CHALLENGE, SERVICE_CHALLENGE_RESPONSE_LENGTH)?;
                let service = self.head_service("SERVICE_CHALLENGE response")?;
                let password = service.password().ok_or(SessionError::WrongState {
                    message: "SERVICE_CHALLENGE response for open service",
                    state: self.state,
                })?;
                let hash = service_password_hash(password, &salt)?;
                info!(%service, "activating service");
                self.queue.set_state(QueueState::ActivatingService);
                self.send_data(activate_service_request(service, Some(&hash)))
            }
            QueueState::ActivatingService => {
                let body =
                    expect_success(payload, APP_ACTIVATE_SERVICE, ACTIVATE_SERVICE_RESPONSE_LENGTH)?;
                let service = self.head_service("ACTIVATE_SERVICE response")?;
                if body[0] != service.id() {
                    return Err(AppLayerError::InvalidService {
                        expected: service.id(),
                        actual: body[0],
                    }
                    .into());
                }
                info!(%service, "service activated");
                self.queue.mark_activated(service);
                self.send_command()
            }
            QueueState::WaitingForResponse => {
                let Some(head) = self.queue.head() else {
                    return Err(SessionError::WrongState {
                        message: "command response",
                        state: self.state,
                    });
                };
                let response = check_response(
                    payload,
                    head.service(),
                    head.command_id(),
                    head.response_length(),
                    head.response_crc(),
                )?;
                if let Some(request) = self.queue.pop() {
                    match response {
                        AppResponse::Success(body) => {
                            debug!(command = request.name(), "command completed");
                            request.complete(Ok(body));
                        }
                        AppResponse::Error(code) => {
                            warn!(command = request.name(), code = format_args!("{code:#06x}"), "pump returned error");
                            request.complete(Err(CommandError::App(code)));
                        }
                    }
                }
                self.queue.set_state(QueueState::QueueEmpty);
                self.continue_queue()
            }
            QueueState::QueueEmpty => Err(SessionError::WrongState {
                message: "unsolicited DATA",
                state: self.state,
            }),
        }
    }

    fn continue_queue(&mut self) -> SessionResult<()> {
        if !self.queue.is_empty() {
            self.send_next()
        } else if self.locks.is_empty() {
            self.send_disconnect()
        } else {
            Ok(())
        }
    }

    fn send_next(&mut self) -> SessionResult<()> {
        match self.queue.next_step() {
            None => Ok(()),
            Some(NextStep::Command) => self.send_command(),
            Some(NextStep::ActivateService(service)) => {
                debug!(%service, "activating service without password");
                self.queue.set_state(QueueState::ActivatingService);
                self.send_data(activate_service_request(service, None))
            }
            Some(NextStep::ServiceChallenge(service)) => {
                debug!(%service, "requesting service challenge");
                self.queue.set_state(QueueState::ServiceChallenge);
                self.send_data(service_challenge_request(service))
            }
        }
    }

    fn send_command(&mut self) -> SessionResult<()> {
        let Some(head) = self.queue.head() else {
            return Ok(());
        };
        info!(command = head.name(), service = %head.service(), "sending command");
        let message = encode_request(
            head.service(),
            head.command_id(),
            head.payload(),
            head.request_crc(),
        );
        self.queue.set_state(QueueState::WaitingForResponse);
        self.send_data(message)
    }

    fn send_disconnect(&mut self) -> SessionResult<()> {
        info!("no connection requests left, disconnecting");
        self.set_state(ConnectionState::AppDisconnect)?;
        self.send_data(disconnect_request())
    }

    fn reconnect_if_requested(&mut self) -> SessionResult<()> {
        self.cleanup();
        if self.is_paired && !self.locks.is_empty() {
            self.connect_or_enable()
        } else {
            self.fallback(ConnectionState::Disconnected);
            Ok(())
        }
    }
}

fn error_frame(payload: &[u8]) -> SessionError {
    if payload.len() != 1 {
        return FrameError::InvalidPayloadLength.into();
    }
    match SatlErrorCode::from_byte(payload[0]) {
        Some(code) => SessionError::Remote(code),
        None => SessionError::UnknownRemoteError(payload[0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[test]
    fn test_packed_timestamp() {
        let time = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let packed = packed_timestamp(&time);

        assert_eq!(packed & 0x3F, 30);
        assert_eq!((packed >> 6) & 0x3F, 45);
        assert_eq!((packed >> 12) & 0x1F, 13);
        assert_eq!((packed >> 17) & 0x1F, 15);
        assert_eq!((packed >> 22) & 0x0F, 3);
        assert_eq!(packed >> 26, 24);
    }

    #[test]
    fn test_error_frame() {
        assert!(matches!(
            error_frame(&[3]),
            SessionError::Remote(SatlErrorCode::InvalidMac)
        ));
        assert!(matches!(error_frame(&[200]), SessionError::UnknownRemoteError(200)));
        assert!(matches!(
            error_frame(&[]),
            SessionError::Frame(FrameError::InvalidPayloadLength)
        ));
    }

    #[tokio::test]
    async fn test_jobs_replace_and_finish() {
        let mut jobs = Jobs::default();

        let first = jobs.next_id();
        jobs.insert(JobKind::Timeout, first, tokio::spawn(std::future::pending::<()>()));
        let second = jobs.next_id();
        let slow = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        jobs.insert(JobKind::Timeout, second, slow);

        assert!(!jobs.is_current(JobKind::Timeout, first));
        assert!(!jobs.finish(JobKind::Timeout, first));
        assert!(jobs.finish(JobKind::Timeout, second));
        assert!(!jobs.finish(JobKind::Timeout, second));
    }

    #[tokio::test]
    async fn test_jobs_cancel_all_aborts() {
        let mut jobs = Jobs::default();
        let id = jobs.next_id();
        let (tx, rx) = oneshot::channel::<()>();
        jobs.insert(
            JobKind::Read,
            id,
            tokio::spawn(async move {
                let _tx = tx;
                std::future::pending::<()>().await;
            }),
        );

        jobs.cancel_all();
        // the aborted task drops its sender
        assert!(rx.await.is_err());
        assert!(!jobs.is_current(JobKind::Read, id));
    }
}
