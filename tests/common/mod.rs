//! A simulated pump speaking the real wire protocol over in-memory streams.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use insight_link::app::Service;
use insight_link::core::{
    APP_ACTIVATE_SERVICE, APP_BIND, APP_CONNECT, APP_SERVICE_CHALLENGE, APP_VERSION,
    PAIRING_CONFIRMED,
};
use insight_link::crypto::{SessionKey, derive_session_keys, service_password_hash};
use insight_link::transport::{
    FrameBuffer, Link, PairingData, SatlCommand, SatlPacket, encode_packet, transcript,
};
use insight_link::ConnectionState;
use insight_link::client::StateReceiver;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::Sha1;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

pub const PUMP_COMM_ID: u32 = 0x0BAD_CAFE;

/// Link handing the far end of every opened stream to the test.
pub struct SimLink {
    streams: mpsc::UnboundedSender<DuplexStream>,
    radio: AtomicBool,
}

impl SimLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::with_radio(true)
    }

    pub fn with_radio(enabled: bool) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            streams: tx,
            radio: AtomicBool::new(enabled),
        };
        (link, rx)
    }
}

impl Link for SimLink {
    type Stream = DuplexStream;

    fn is_radio_enabled(&self) -> bool {
        self.radio.load(Ordering::SeqCst)
    }

    async fn enable_radio(&self) -> io::Result<bool> {
        self.radio.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn open(&self) -> io::Result<DuplexStream> {
        let (near, far) = tokio::io::duplex(8192);
        self.streams
            .send(far)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "simulator gone"))?;
        Ok(near)
    }
}

/// Matching client and pump views of an established pairing.
pub fn paired_sessions() -> (PairingData, PairingData) {
    let to_client = SessionKey::from_bytes([0x11; 16]);
    let to_pump = SessionKey::from_bytes([0x22; 16]);
    (
        PairingData::new(PUMP_COMM_ID, to_client.clone(), to_pump.clone()),
        PairingData::new(PUMP_COMM_ID, to_pump, to_client),
    )
}

/// Collect states until `target` arrives.
pub async fn states_until(states: &mut StateReceiver, target: ConnectionState) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    while let Some(state) = states.recv().await {
        seen.push(state);
        if state == target {
            break;
        }
    }
    seen
}

/// An application request as the pump sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRequest {
    pub service: u8,
    pub command: u16,
    pub payload: Vec<u8>,
}

/// The pump end of one link.
pub struct SimPump {
    stream: DuplexStream,
    buffer: FrameBuffer,
    pub session: Option<PairingData>,
}

impl SimPump {
    /// Wait for the client to open the next link.
    pub async fn accept(
        streams: &mut mpsc::UnboundedReceiver<DuplexStream>,
        session: Option<PairingData>,
    ) -> Self {
        let stream = streams.recv().await.expect("link never opened");
        Self {
            stream,
            buffer: FrameBuffer::new(4096),
            session,
        }
    }

    /// Drop the link and hand back the pump's session state.
    pub fn close(self) -> Option<PairingData> {
        self.session
    }

    /// Next packet, or `None` once the client closed the link.
    pub async fn try_recv_packet(&mut self) -> Option<SatlPacket> {
        let mut chunk = [0u8; 512];
        loop {
            if let Some(bytes) = self.buffer.next_packet().expect("client sent garbage") {
                return Some(SatlPacket::parse(bytes).expect("client sent malformed packet"));
            }
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buffer.push(&chunk[..n]).expect("pump buffer overflow");
        }
    }

    pub async fn recv_packet(&mut self) -> SatlPacket {
        self.try_recv_packet().await.expect("link closed by client")
    }

    /// Next packet, opened with the session keys once they exist.
    pub async fn recv(&mut self) -> (SatlCommand, Vec<u8>) {
        let packet = self.recv_packet().await;
        let command = packet.command().expect("unknown command from client");
        let payload = match self.session.as_mut() {
            Some(session) => session.open(&packet).expect("client frame failed authentication"),
            None => packet.open_unkeyed().expect("client frame failed CRC"),
        };
        (command, payload)
    }

    pub async fn expect(&mut self, expected: SatlCommand) -> Vec<u8> {
        let (command, payload) = self.recv().await;
        assert_eq!(command, expected);
        payload
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("client link closed");
    }

    pub async fn send_unkeyed(&mut self, command: SatlCommand, payload: &[u8]) -> Vec<u8> {
        let packet = encode_packet(command, PUMP_COMM_ID, payload, None).unwrap();
        self.send_raw(&packet).await;
        packet
    }

    pub async fn send_keyed(&mut self, command: SatlCommand, payload: &[u8]) -> Vec<u8> {
        let packet = self
            .session
            .as_mut()
            .expect("no session keys")
            .seal(command, payload)
            .unwrap();
        self.send_raw(&packet).await;
        packet
    }

    /// Run pairing up to the displayed code; returns the pump's code.
    pub async fn pair_until_display(&mut self) -> String {
        assert!(self.expect(SatlCommand::ConnectionRequest).await.is_empty());
        self.send_unkeyed(SatlCommand::ConnectionResponse, &[0]).await;

        let packet = self.recv_packet().await;
        assert_eq!(packet.command(), Ok(SatlCommand::KeyRequest));
        assert_eq!(packet.comm_id(), 1);
        let key_request = packet.transcript().to_vec();
        let body = packet.open_unkeyed().unwrap();
        assert_eq!(body.len(), 288);
        let local_random = &body[..28];
        let modulus = &body[32..];

        let public = RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from(65537u32)).unwrap();
        let mut secret = [0u8; 64];
        OsRng.fill_bytes(&mut secret);
        let encrypted = public.encrypt(&mut OsRng, Oaep::new::<Sha1>(), &secret).unwrap();
        let mut peer_random = [0u8; 28];
        OsRng.fill_bytes(&mut peer_random);

        let mut response = Vec::with_capacity(288);
        response.extend_from_slice(&peer_random);
        response.extend_from_slice(&[0u8; 4]);
        response.extend_from_slice(&encrypted);
        let packet = self.send_unkeyed(SatlCommand::KeyResponse, &response).await;

        let keys =
            derive_session_keys(&secret, &key_request, transcript(&packet), local_random, &peer_random)
                .unwrap();
        self.session = Some(PairingData::new(PUMP_COMM_ID, keys.outgoing, keys.incoming));

        assert!(self.expect(SatlCommand::VerifyDisplayRequest).await.is_empty());
        self.send_keyed(SatlCommand::VerifyDisplayResponse, &[]).await;
        keys.verification_code
    }

    /// Answer one `VERIFY_CONFIRM_REQUEST` with `status`.
    pub async fn answer_confirm(&mut self, status: u16) {
        let payload = self.expect(SatlCommand::VerifyConfirmRequest).await;
        assert_eq!(payload, PAIRING_CONFIRMED.to_le_bytes());
        self.send_keyed(SatlCommand::VerifyConfirmResponse, &status.to_le_bytes()).await;
    }

    /// Answer `BIND`.
    pub async fn bind(&mut self) {
        let request = self.expect_app().await;
        assert_eq!((request.service, request.command), (0, APP_BIND));
        assert_eq!(request.payload.len(), 68);
        self.reply_app(0, APP_BIND, 0, &[0u8; 16]).await;
    }

    /// Resume a paired session: `SYN_REQUEST`, `SYN_ACK`, `CONNECT`.
    pub async fn syn(&mut self) {
        assert!(self.expect(SatlCommand::SynRequest).await.is_empty());
        self.send_keyed(SatlCommand::SynAckResponse, &[]).await;
        let request = self.expect_app().await;
        assert_eq!(
            request,
            AppRequest {
                service: 0,
                command: APP_CONNECT,
                payload: vec![0u8; 8],
            }
        );
        self.reply_app(0, APP_CONNECT, 0, &[0u8; 8]).await;
    }

    pub async fn expect_app(&mut self) -> AppRequest {
        let data = self.expect(SatlCommand::Data).await;
        assert_eq!(data[0], APP_VERSION);
        AppRequest {
            service: data[1],
            command: u16::from_le_bytes([data[2], data[3]]),
            payload: data[4..].to_vec(),
        }
    }

    pub async fn reply_app(&mut self, service: u8, command: u16, error: u16, body: &[u8]) {
        let mut data = vec![APP_VERSION, service];
        data.extend_from_slice(&command.to_le_bytes());
        data.extend_from_slice(&error.to_le_bytes());
        data.extend_from_slice(body);
        self.send_keyed(SatlCommand::Data, &data).await;
    }

    /// Serve service activation, including the challenge for protected services.
    pub async fn activate(&mut self, service: Service) {
        let versions = [service.id(), service.version_major(), service.version_minor()];
        let request = if let Some(password) = service.password() {
            let challenge = self.expect_app().await;
            assert_eq!((challenge.service, challenge.command), (0, APP_SERVICE_CHALLENGE));
            assert_eq!(challenge.payload, versions);
            let salt = [0x5Au8; 16];
            self.reply_app(0, APP_SERVICE_CHALLENGE, 0, &salt).await;

            let request = self.expect_app().await;
            let hash = service_password_hash(password, &salt).unwrap();
            assert_eq!(&request.payload[3..], &hash);
            request
        } else {
            let request = self.expect_app().await;
            assert_eq!(&request.payload[3..], &[0u8; 16]);
            request
        };
        assert_eq!((request.service, request.command), (0, APP_ACTIVATE_SERVICE));
        assert_eq!(&request.payload[..3], &versions);
        self.reply_app(0, APP_ACTIVATE_SERVICE, 0, &versions).await;
    }
}
