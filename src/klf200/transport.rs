//! TLS transport to the gateway
//!
//! Owns the socket: a writer task serializes outgoing frames, a reader task
//! decodes the SLIP stream and routes every frame to exactly one consumer:
//! a pending request/confirm slot, a temporary discovery collector, or the
//! session's notification channel. Connection loss surfaces as a single
//! `Closed` transport event.
//!
//! The gateway ships a self-signed certificate, so WebPKI validation is off
//! the table. When a fingerprint is configured the presented certificate's
//! SHA-256 digest must match exactly; without one any certificate is
//! accepted. Signature verification still runs through the ring provider.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::Klf200Config;
use crate::error::{BridgeError, Result};
use crate::klf200::protocol::{Frame, FrameDecoder};

/// How long a request waits for its confirm frame
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Read buffer size; gateway frames are at most a few hundred bytes
const READ_BUFFER_SIZE: usize = 4096;

/// Events delivered to the session's dispatcher
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// An unsolicited notification frame
    Frame(Frame),
    /// The transport is gone; no further frames will arrive
    Closed(String),
}

/// Certificate verifier accepting the gateway's self-signed certificate,
/// optionally pinned to a SHA-256 fingerprint
#[derive(Debug)]
struct GatewayCertVerifier {
    fingerprint: Option<Vec<u8>>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for GatewayCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(expected) = &self.fingerprint {
            let digest = Sha256::digest(end_entity.as_ref());
            if digest.as_slice() != expected.as_slice() {
                return Err(rustls::Error::General(
                    "gateway certificate fingerprint mismatch".to_string(),
                ));
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// One live gateway connection
pub(crate) struct Connection {
    outgoing: mpsc::Sender<Frame>,
    pending: Arc<Mutex<HashMap<u16, oneshot::Sender<Frame>>>>,
    collectors: Arc<Mutex<HashMap<u16, mpsc::UnboundedSender<Frame>>>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Dial, complete the TLS handshake within the configured timeout and
    /// start the I/O tasks. Notifications and the eventual close reason are
    /// delivered on `events`.
    pub(crate) async fn open(
        config: &Klf200Config,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let fingerprint = config.fingerprint_bytes()?;
        let address = format!("{}:{}", config.host, config.port);

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls_config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| BridgeError::connection(format!("TLS configuration: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(GatewayCertVerifier {
                fingerprint,
                provider,
            }))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| BridgeError::connection(format!("invalid gateway host: {e}")))?;

        let stream = tokio::time::timeout(config.connection_timeout(), async {
            let tcp = TcpStream::connect(&address)
                .await
                .map_err(|e| BridgeError::connection(format!("connect {address}: {e}")))?;
            tcp.set_nodelay(true)
                .map_err(|e| BridgeError::connection(format!("socket options: {e}")))?;
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| BridgeError::connection(format!("TLS handshake with {address}: {e}")))
        })
        .await
        .map_err(|_| BridgeError::timeout(format!("connecting to gateway at {address}")))??;

        debug!(%address, "gateway transport established");

        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::channel::<Frame>(32);
        let pending: Arc<Mutex<HashMap<u16, oneshot::Sender<Frame>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let collectors: Arc<Mutex<HashMap<u16, mpsc::UnboundedSender<Frame>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let writer_task = tokio::spawn(write_loop(write_half, outgoing_rx, events.clone()));
        let reader_task = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            collectors.clone(),
            events,
        ));

        Ok(Self {
            outgoing,
            pending,
            collectors,
            reader_task,
            writer_task,
        })
    }

    /// Send a request and wait for its confirm frame
    pub(crate) async fn request(&self, frame: Frame, confirm: u16) -> Result<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(confirm, tx);
        if self.outgoing.send(frame).await.is_err() {
            self.pending.lock().await.remove(&confirm);
            return Err(BridgeError::NotConnected);
        }
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            // the reader dropped the sender: connection is gone
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&confirm);
                Err(BridgeError::timeout(format!(
                    "no confirm 0x{confirm:04X} from gateway"
                )))
            }
        }
    }

    /// Route the given notification commands into a dedicated receiver
    /// until [`Connection::remove_collector`] is called. Used for the
    /// multi-frame discovery replies.
    pub(crate) async fn register_collector(
        &self,
        commands: &[u16],
    ) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut collectors = self.collectors.lock().await;
        for &command in commands {
            collectors.insert(command, tx.clone());
        }
        rx
    }

    /// Stop routing the given commands to a collector
    pub(crate) async fn remove_collector(&self, commands: &[u16]) {
        let mut collectors = self.collectors.lock().await;
        for command in commands {
            collectors.remove(command);
        }
    }

    /// Tear the connection down; in-flight requests observe `NotConnected`
    pub(crate) fn close(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut write_half: tokio::io::WriteHalf<tokio_rustls::client::TlsStream<TcpStream>>,
    mut outgoing: mpsc::Receiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(frame) = outgoing.recv().await {
        let bytes = frame.encode();
        if let Err(e) = write_half.write_all(&bytes).await {
            let _ = events.send(TransportEvent::Closed(format!("write failed: {e}")));
            return;
        }
        if let Err(e) = write_half.flush().await {
            let _ = events.send(TransportEvent::Closed(format!("flush failed: {e}")));
            return;
        }
    }
}

async fn read_loop(
    mut read_half: tokio::io::ReadHalf<tokio_rustls::client::TlsStream<TcpStream>>,
    pending: Arc<Mutex<HashMap<u16, oneshot::Sender<Frame>>>>,
    collectors: Arc<Mutex<HashMap<u16, mpsc::UnboundedSender<Frame>>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        match read_half.read(&mut buffer).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::Closed(
                    "gateway closed the connection".to_string(),
                ));
                return;
            }
            Ok(n) => {
                for frame in decoder.feed(&buffer[..n]) {
                    route_frame(frame, &pending, &collectors, &events).await;
                }
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Closed(format!("read failed: {e}")));
                return;
            }
        }
    }
}

async fn route_frame(
    frame: Frame,
    pending: &Mutex<HashMap<u16, oneshot::Sender<Frame>>>,
    collectors: &Mutex<HashMap<u16, mpsc::UnboundedSender<Frame>>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    if let Some(slot) = pending.lock().await.remove(&frame.command) {
        if slot.send(frame).is_err() {
            warn!("confirm arrived after the request gave up");
        }
        return;
    }
    let unclaimed = {
        let collectors = collectors.lock().await;
        match collectors.get(&frame.command) {
            // a dropped collector receiver hands the frame back
            Some(collector) => collector.send(frame).err().map(|e| e.0),
            None => Some(frame),
        }
    };
    if let Some(frame) = unclaimed {
        let _ = events.send(TransportEvent::Frame(frame));
    }
}
