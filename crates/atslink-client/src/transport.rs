//! TCP transport multiplexer.
//!
//! One connection owns one reader task and a single-flight command path:
//!
//! - The reader task pulls bytes off the socket, extracts SLIP frames,
//!   and classifies each one. While a session key is active, every frame
//!   is decrypted on arrival: a plaintext starting with 0xC0 is a
//!   panel-originated notification and goes to the COS channel (dropped
//!   when a handler is already busy); 0xA0/0xF0 plaintexts are responses;
//!   anything that fails to decrypt is logged and skipped.
//! - Callers serialize on a fair mutex around the writer and the response
//!   queue, so exactly one request is in flight and responses cannot be
//!   delivered to the wrong waiter. A response that arrives before its
//!   waiter registers simply sits in the queue and is drained first.
//!
//! A CRC or decrypt failure on one frame never poisons the stream; the
//! buffer advances past the frame and the next one is attempted. A
//! failure on a response therefore surfaces to the caller as a timeout.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use atslink_crypto::{RecordKey, SERIAL_LEN, decrypt_record, encrypt_record};
use atslink_proto::crc::{append_crc, strip_crc};
use atslink_proto::messages::{REQUEST_HEADER, RESPONSE_ERROR, RESPONSE_OK};
use atslink_proto::slip;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use crate::error::ClientError;

/// A frame delivered by the reader to the waiting caller.
enum RxFrame {
    /// Raw SLIP frame, pre-session (no key active yet)
    Plain(Vec<u8>),
    /// Decrypted response plaintext (header byte included)
    Decrypted(Vec<u8>),
}

/// Writer half plus the response queue, guarded together so a new call
/// cannot start sending before the previous one has been resolved.
struct CallState {
    writer: OwnedWriteHalf,
    responses: mpsc::UnboundedReceiver<RxFrame>,
}

/// One panel connection.
pub(crate) struct Transport {
    state: Mutex<CallState>,
    key: Arc<RwLock<Option<RecordKey>>>,
    serial: Arc<RwLock<[u8; SERIAL_LEN]>>,
    cos_rx: std::sync::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    reader: tokio::task::JoinHandle<()>,
    call_timeout: Duration,
}

impl Transport {
    /// Connect and spawn the reader task.
    pub(crate) async fn connect(addr: &str, call_timeout: Duration) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr: addr.to_string(), source })?;
        let _ = stream.set_nodelay(true);

        let (read_half, writer) = stream.into_split();

        let key = Arc::new(RwLock::new(None));
        let serial = Arc::new(RwLock::new([0u8; SERIAL_LEN]));
        let (resp_tx, responses) = mpsc::unbounded_channel();
        // Capacity 1: a notification arriving while one is being handled
        // is dropped; the next full refresh subsumes it
        let (cos_tx, cos_rx) = mpsc::channel(1);

        let reader = tokio::spawn(read_loop(
            read_half,
            resp_tx,
            cos_tx,
            Arc::clone(&key),
            Arc::clone(&serial),
        ));

        Ok(Self {
            state: Mutex::new(CallState { writer, responses }),
            key,
            serial,
            cos_rx: std::sync::Mutex::new(Some(cos_rx)),
            reader,
            call_timeout,
        })
    }

    /// Install the serial used in record IVs (from `device_info`).
    pub(crate) fn set_serial(&self, serial: [u8; SERIAL_LEN]) {
        if let Ok(mut slot) = self.serial.write() {
            *slot = serial;
        }
    }

    /// Activate (or replace) the record key. All traffic from the next
    /// frame on, in both directions, uses it.
    pub(crate) fn set_key(&self, key: RecordKey) {
        if let Ok(mut slot) = self.key.write() {
            *slot = Some(key);
        }
    }

    /// Drop the record key (logout/disconnect).
    pub(crate) fn clear_key(&self) {
        if let Ok(mut slot) = self.key.write() {
            *slot = None;
        }
    }

    fn current_key(&self) -> Option<RecordKey> {
        self.key.read().ok().and_then(|slot| slot.clone())
    }

    fn current_serial(&self) -> [u8; SERIAL_LEN] {
        self.serial.read().map(|s| *s).unwrap_or([0u8; SERIAL_LEN])
    }

    /// Take the unsolicited-frame receiver. The monitor calls this once.
    pub(crate) fn take_cos_receiver(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.cos_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Pre-session call: CRC + SLIP, no encryption. Used only for the
    /// `device_info` boot query.
    pub(crate) async fn call_plain(
        &self,
        request: &[u8],
        throw_on_error: bool,
    ) -> Result<Vec<u8>, ClientError> {
        let framed = slip::encode(&append_crc(request));
        let mut state = self.state.lock().await;

        trace!(frame = %hex_of(&framed), "sending plain frame");
        state.writer.write_all(&framed).await?;

        let deadline = tokio::time::Instant::now() + self.call_timeout;
        let plaintext = loop {
            let frame = recv_until(&mut state.responses, deadline).await?;
            match frame {
                RxFrame::Plain(raw) => {
                    let decoded = slip::decode(&raw);
                    match strip_crc(&decoded) {
                        Ok(body) => break body.to_vec(),
                        Err(e) => {
                            warn!(error = %e, "plain response failed CRC, skipping frame");
                        },
                    }
                },
                RxFrame::Decrypted(_) => {
                    debug!("ignoring encrypted frame while in plain mode");
                },
            }
        };

        check_error_header(&plaintext, throw_on_error)?;
        Ok(plaintext)
    }

    /// In-session call: encrypt with the active key, await the decrypted
    /// response.
    pub(crate) async fn call_encrypted(
        &self,
        request: &[u8],
        throw_on_error: bool,
    ) -> Result<Vec<u8>, ClientError> {
        let key = self.active_key()?;
        let serial = self.current_serial();

        let record = encrypt_record(request, &key, &serial, rand::random());
        let framed = slip::encode(&record);

        let mut state = self.state.lock().await;
        trace!(len = framed.len(), "sending encrypted frame");
        state.writer.write_all(&framed).await?;

        let deadline = tokio::time::Instant::now() + self.call_timeout;
        let plaintext = loop {
            match recv_until(&mut state.responses, deadline).await? {
                RxFrame::Decrypted(plaintext) => break plaintext,
                RxFrame::Plain(_) => {
                    debug!("ignoring plain frame while a session key is active");
                },
            }
        };

        trace!(frame = %hex_of(&plaintext), "received response");
        check_error_header(&plaintext, throw_on_error)?;
        Ok(plaintext)
    }

    /// Send an encrypted frame without waiting for any response (the COS
    /// acknowledgement).
    pub(crate) async fn send_encrypted(&self, request: &[u8]) -> Result<(), ClientError> {
        let key = self.active_key()?;
        let serial = self.current_serial();

        let record = encrypt_record(request, &key, &serial, rand::random());
        let framed = slip::encode(&record);

        let mut state = self.state.lock().await;
        state.writer.write_all(&framed).await?;
        Ok(())
    }

    fn active_key(&self) -> Result<RecordKey, ClientError> {
        self.current_key().ok_or_else(|| ClientError::KeyExchange {
            reason: "no record key active on this connection".to_string(),
        })
    }

    /// Tear the connection down: stop the reader, close the socket, wipe
    /// the key. The owning client sends `logout` first, best-effort.
    pub(crate) async fn shutdown(&self) {
        self.reader.abort();
        self.clear_key();
        let mut state = self.state.lock().await;
        let _ = state.writer.shutdown().await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Receive the next frame before `deadline`, mapping closure and expiry.
async fn recv_until(
    responses: &mut mpsc::UnboundedReceiver<RxFrame>,
    deadline: tokio::time::Instant,
) -> Result<RxFrame, ClientError> {
    match tokio::time::timeout_at(deadline, responses.recv()).await {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(ClientError::Transport(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "connection closed",
        ))),
        Err(_) => Err(ClientError::Timeout),
    }
}

/// Raise `ClientError::Panel` for an 0xF0 header when asked to.
fn check_error_header(plaintext: &[u8], throw_on_error: bool) -> Result<(), ClientError> {
    if throw_on_error && plaintext.first() == Some(&RESPONSE_ERROR) {
        return Err(ClientError::Panel {
            code: plaintext.get(1..).unwrap_or_default().to_vec(),
            frame_hex: hex_of(plaintext),
        });
    }
    Ok(())
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Pull one `0xC0 … 0xC0` frame out of the rolling buffer, discarding
/// leading garbage and collapsing empty frames.
fn extract_frame(buf: &mut BytesMut) -> Option<Vec<u8>> {
    loop {
        let start = buf.iter().position(|&b| b == slip::END)?;
        if start > 0 {
            buf.advance(start);
        }

        let end = buf.iter().skip(1).position(|&b| b == slip::END)? + 1;
        if end == 1 {
            // Empty frame: drop the opener, keep the closer as the next
            // frame's opener
            buf.advance(1);
            continue;
        }

        let frame = buf[..=end].to_vec();
        buf.advance(end + 1);
        return Some(frame);
    }
}

/// Reader task: read, extract, classify, route.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    resp_tx: mpsc::UnboundedSender<RxFrame>,
    cos_tx: mpsc::Sender<Vec<u8>>,
    key: Arc<RwLock<Option<RecordKey>>>,
    serial: Arc<RwLock<[u8; SERIAL_LEN]>>,
) {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("panel closed the connection");
                break;
            },
            Ok(_) => {},
            Err(e) => {
                warn!(error = %e, "socket read failed");
                break;
            },
        }

        while let Some(frame) = extract_frame(&mut buf) {
            let active_key = key.read().ok().and_then(|k| k.clone());
            let Some(active_key) = active_key else {
                if resp_tx.send(RxFrame::Plain(frame)).is_err() {
                    return;
                }
                continue;
            };

            let record = slip::decode(&frame);
            let serial_bytes = serial.read().map(|s| *s).unwrap_or([0u8; SERIAL_LEN]);
            match decrypt_record(&record, &active_key, &serial_bytes) {
                Ok(plaintext) => match plaintext.first() {
                    Some(&REQUEST_HEADER) => {
                        trace!(frame = %hex_of(&plaintext), "unsolicited frame");
                        if cos_tx.try_send(plaintext).is_err() {
                            debug!("dropped a notification while a handler is busy");
                        }
                    },
                    Some(&RESPONSE_OK | &RESPONSE_ERROR) => {
                        if resp_tx.send(RxFrame::Decrypted(plaintext)).is_err() {
                            return;
                        }
                    },
                    _ => {
                        debug!("discarding decrypted frame with unknown header");
                    },
                },
                Err(e) => {
                    debug!(error = %e, "discarding frame that failed decryption");
                },
            }
        }
    }
}
