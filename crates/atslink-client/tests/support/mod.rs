//! In-process mock panel speaking the real wire format.
//!
//! Listens on a loopback socket, answers the handshake, login, query,
//! control and log operations from a scripted [`MockPanelConfig`], and
//! can inject unsolicited change-of-state frames mid-session. Tests drive
//! the real client against it end to end, encryption included.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use atslink_crypto::{RecordKey, decrypt_record, derive_initial_key, encrypt_record, session_key};
use atslink_proto::messages::EntityKind;
use atslink_proto::serial::decode_serial;
use atslink_proto::{crc, slip};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Nonce used for every mock response; uniqueness is irrelevant here.
const MOCK_NONCE: [u8; 8] = [0x5A; 8];

/// Panel half of the session key the mock always hands out.
pub const PANEL_KEY_HALF: [u8; 8] = [0xA5, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];

/// Scripted behaviour of the mock panel.
#[derive(Debug, Clone)]
pub struct MockPanelConfig {
    pub product: String,
    pub firmware: String,
    pub serial_text: String,
    pub encryption_password: String,
    pub pin: String,
    pub account: Option<(String, String)>,
    /// Valid area numbers reported by the bitset query.
    pub areas: Vec<u16>,
    /// Zones per area, served by `get_zones_assigned`.
    pub zones_by_area: BTreeMap<u16, Vec<u16>>,
    /// Entity names, keyed by type tag and number.
    pub names: BTreeMap<(u8, u16), String>,
    /// Sequence of control-session state ids served to status polls;
    /// the last one repeats once exhausted.
    pub arm_states: Vec<u16>,
    /// Zones served by the fault/active/inhibited traversal.
    pub issue_zones: Vec<u16>,
    /// Outcome of boolean verbs (inhibit, outputs, triggers).
    pub boolean_verb_ok: bool,
    /// Changed entity numbers per type tag, served by `get_changes`.
    pub changed: BTreeMap<u8, Vec<u16>>,
    /// Raw status data bytes per entity (without the id prefix).
    pub statuses: BTreeMap<(u8, u16), Vec<u8>>,
    /// Event-log records; the last one repeats once exhausted.
    pub log_records: Vec<Vec<u8>>,
}

impl Default for MockPanelConfig {
    fn default() -> Self {
        let mut zones_by_area = BTreeMap::new();
        zones_by_area.insert(1, vec![1, 2, 3]);
        zones_by_area.insert(2, vec![3, 4]);

        let mut names = BTreeMap::new();
        names.insert((0x02, 1), "House".to_string());
        names.insert((0x02, 2), "Garage".to_string());
        names.insert((0x01, 1), "Front door".to_string());
        names.insert((0x01, 2), "Hallway".to_string());
        names.insert((0x01, 3), "Kitchen".to_string());
        names.insert((0x01, 4), "Garage door".to_string());
        names.insert((0x07, 1), "Siren".to_string());
        names.insert((0x14, 1), "Night mode".to_string());
        names.insert((0x0B, 1), "Main entrance".to_string());

        Self {
            product: "ATS1500A-IP".to_string(),
            firmware: "MR_4.1.38741".to_string(),
            serial_text: "ABCDEFGHIJKLMNOP".to_string(),
            encryption_password: "AAAAAAAAAAAABBBBBBBBBBBB".to_string(),
            pin: "1234".to_string(),
            account: None,
            areas: vec![1, 2],
            zones_by_area,
            names,
            arm_states: vec![0x0504],
            issue_zones: vec![],
            boolean_verb_ok: true,
            changed: BTreeMap::new(),
            statuses: BTreeMap::new(),
            log_records: vec![],
        }
    }
}

/// Counters the tests assert on.
#[derive(Debug, Default)]
pub struct MockStats {
    pub sessions_created: AtomicUsize,
    pub sessions_destroyed: AtomicUsize,
    pub arms_sent: AtomicUsize,
    pub forces_sent: AtomicUsize,
    pub acks_received: AtomicUsize,
    pub pings_received: AtomicUsize,
}

impl MockStats {
    pub fn sessions_balanced(&self) -> bool {
        self.sessions_created.load(Ordering::SeqCst)
            == self.sessions_destroyed.load(Ordering::SeqCst)
    }
}

/// Handle to a running mock panel.
pub struct MockPanel {
    pub addr: SocketAddr,
    pub stats: Arc<MockStats>,
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockPanel {
    /// Send an unsolicited change-of-state frame with the given type tag.
    pub fn inject_cos(&self, tag: u8) {
        // [0xC0][0xCA][status][p0][p1][p2 = change tag]
        self.inject_tx
            .send(vec![0xC0, 0xCA, 0x00, 0x00, 0x00, tag])
            .expect("mock panel task is alive");
    }
}

/// Build an event-log record with the given sequence and description.
pub fn log_record(len: usize, sequence: u8, description: &str) -> Vec<u8> {
    let mut record = vec![0u8; len];
    record[0] = 0x01;
    record[1..7].copy_from_slice(&[0x25, 0x06, 0x15, 0x12, 0x30, 0x00]);
    record[7] = sequence;
    record[8] = 0x02;
    record[9..11].copy_from_slice(&[0x10, 0x00]);
    record[11] = 0x01;
    record[12] = 0x00;
    record[13..15].copy_from_slice(&[0x01, 0x00]);
    record[15] = 0x01;
    let desc = description.as_bytes();
    record[28..28 + desc.len()].copy_from_slice(desc);
    record
}

/// Start the mock on an ephemeral loopback port.
pub async fn start(config: MockPanelConfig) -> MockPanel {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let stats = Arc::new(MockStats::default());
    let (inject_tx, inject_rx) = mpsc::unbounded_channel();

    tokio::spawn(run(listener, config, Arc::clone(&stats), inject_rx));

    MockPanel { addr, stats, inject_tx }
}

async fn run(
    listener: TcpListener,
    config: MockPanelConfig,
    stats: Arc<MockStats>,
    mut inject_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let Ok((mut stream, _)) = listener.accept().await else {
        return;
    };
    let mut state = PanelState::new(config, stats);
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            injected = inject_rx.recv() => {
                let Some(plaintext) = injected else { break };
                let framed = state.seal(&plaintext);
                if stream.write_all(&framed).await.is_err() {
                    break;
                }
            },
            read = stream.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                while let Some(frame) = extract_frame(&mut buf) {
                    for response in state.handle_frame(&frame) {
                        if stream.write_all(&response).await.is_err() {
                            return;
                        }
                    }
                }
            },
        }
    }
}

fn extract_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        let start = buf.iter().position(|&b| b == 0xC0)?;
        buf.drain(..start);
        let end = buf.iter().skip(1).position(|&b| b == 0xC0)? + 1;
        if end == 1 {
            buf.drain(..1);
            continue;
        }
        let frame: Vec<u8> = buf.drain(..=end).collect();
        return Some(frame);
    }
}

enum CryptoMode {
    Plain,
    Keyed(RecordKey),
}

struct PanelState {
    config: MockPanelConfig,
    stats: Arc<MockStats>,
    mode: CryptoMode,
    pending_mode: Option<CryptoMode>,
    serial: [u8; 6],
    next_session: u16,
    arm_script: VecDeque<u16>,
    last_arm_state: u16,
    issue_cursor: usize,
    log_cursor: usize,
}

impl PanelState {
    fn new(config: MockPanelConfig, stats: Arc<MockStats>) -> Self {
        let serial = decode_serial(&config.serial_text).unwrap_or([0u8; 6]);
        let arm_script: VecDeque<u16> = config.arm_states.iter().copied().collect();
        let last_arm_state = config.arm_states.last().copied().unwrap_or(0x0505);
        Self {
            config,
            stats,
            mode: CryptoMode::Plain,
            pending_mode: None,
            serial,
            next_session: 0x0100,
            arm_script,
            last_arm_state,
            issue_cursor: 0,
            log_cursor: 0,
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        match &self.mode {
            CryptoMode::Plain => slip::encode(&crc::append_crc(plaintext)),
            CryptoMode::Keyed(key) => {
                slip::encode(&encrypt_record(plaintext, key, &self.serial, MOCK_NONCE))
            },
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Vec<Vec<u8>> {
        let decoded = slip::decode(frame);
        let request = match &self.mode {
            CryptoMode::Plain => match crc::strip_crc(&decoded) {
                Ok(body) => body.to_vec(),
                Err(_) => return vec![],
            },
            CryptoMode::Keyed(key) => match decrypt_record(&decoded, key, &self.serial) {
                Ok(plaintext) => plaintext,
                Err(_) => return vec![],
            },
        };

        let responses = self.dispatch(&request);
        let out: Vec<Vec<u8>> = responses.iter().map(|p| self.seal(p)).collect();
        if let Some(mode) = self.pending_mode.take() {
            self.mode = mode;
        }
        out
    }

    fn dispatch(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        // The fire-and-forget COS acknowledgement arrives with an 0xA0
        // header; everything else is a 0xC0 request
        if request.first() == Some(&0xA0) {
            self.stats.acks_received.fetch_add(1, Ordering::SeqCst);
            return vec![];
        }
        if request.first() != Some(&0xC0) || request.len() < 2 {
            return vec![];
        }

        match request[1] {
            0x00 => {
                let reply = self.device_info_reply();
                self.pending_mode = Some(CryptoMode::Keyed(derive_initial_key(
                    &self.config.encryption_password,
                )));
                vec![reply]
            },
            0x01 => {
                let mut payload = vec![0xA0, 0x01, 0x01, 0x00, 0x00];
                payload.extend_from_slice(&PANEL_KEY_HALF);
                payload.extend_from_slice(&[0u8; 6]);
                vec![payload]
            },
            0x02 => {
                self.pending_mode =
                    Some(CryptoMode::Keyed(session_key(&[0u8; 8], &PANEL_KEY_HALF)));
                vec![vec![0xA0, 0x02, 0x01]]
            },
            0x03 => {
                let pin = ascii_at(request, 4, 10);
                let status = u8::from(pin != self.config.pin) * 0x03;
                vec![vec![0xA0, 0x00, status]]
            },
            0x04 => {
                let username = ascii_at(request, 4, 32);
                let password = ascii_at(request, 36, 32);
                let ok = self
                    .config
                    .account
                    .as_ref()
                    .is_some_and(|(u, p)| *u == username && *p == password);
                vec![vec![0xA0, 0x00, u8::from(!ok) * 0x03]]
            },
            0x05 => {
                let mut payload = vec![0xA0, 0x05, 0x01];
                let mut name = [0u8; 16];
                name[..9].copy_from_slice(b"Installer");
                payload.extend_from_slice(&name);
                vec![payload]
            },
            0x06 => {
                self.stats.pings_received.fetch_add(1, Ordering::SeqCst);
                vec![vec![0xA0, 0x00, 0x00]]
            },
            0x07 | 0x0A => vec![vec![0xA0, 0x00, 0x00]],
            0x0C => {
                self.log_cursor = 0;
                vec![vec![0xA0, 0x00, 0x00]]
            },
            0x0E => vec![self.log_entry_reply(request.get(3).copied().unwrap_or(0))],
            0x10 => vec![self.names_reply(request, false)],
            0x15 => vec![self.names_reply(request, true)],
            0x13 => {
                let mut payload = vec![0xA0, 0x13, 0x02];
                payload.extend_from_slice(&bitmap(&self.config.areas, 4));
                vec![payload]
            },
            0x30 => {
                let tag = request.get(2).copied().unwrap_or(0);
                let changed = self.config.changed.get(&tag).cloned().unwrap_or_default();
                let mut payload = vec![0xA0, 0x30, tag];
                payload.extend_from_slice(&bitmap(&changed, 30));
                vec![payload]
            },
            0x31 => {
                let kind = request.get(2).copied().unwrap_or(0);
                let id = request.get(4).copied().unwrap_or(0);
                let mut payload = vec![0xA0];
                payload.extend_from_slice(&self.status_payload(kind, u16::from(id)));
                vec![payload]
            },
            0x32 => {
                let area = request.get(4).copied().unwrap_or(0);
                let mut payload = vec![0xA0];
                payload.extend_from_slice(&self.zones_assigned_payload(u16::from(area)));
                vec![payload]
            },
            0x40 => {
                self.stats.sessions_created.fetch_add(1, Ordering::SeqCst);
                let session = self.next_session;
                self.next_session += 1;
                vec![vec![0xA0, 0x41, 0x01, (session & 0xFF) as u8, (session >> 8) as u8]]
            },
            0x42 => vec![self.verb_reply(request)],
            0x43 => {
                let state = self.arm_script.pop_front().unwrap_or(self.last_arm_state);
                vec![vec![0xA0, 0x43, 0x01, (state >> 8) as u8, (state & 0xFF) as u8]]
            },
            0x44 => {
                self.stats.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
                vec![vec![0xA0, 0x00, 0x00]]
            },
            0x45 => vec![self.issue_reply(request)],
            0xEE => self.batch_reply(request).into_iter().collect(),
            _ => vec![vec![0xF0, 0x01]],
        }
    }

    fn device_info_reply(&self) -> Vec<u8> {
        let mut payload = vec![0u8; 52];
        payload[0] = 0xA0;
        payload[1] = 0x00;
        payload[2] = 0x01;
        write_ascii(&mut payload, 3, 16, &self.config.product);
        write_ascii(&mut payload, 19, 16, &self.config.firmware);
        write_ascii(&mut payload, 35, 16, &self.config.serial_text);
        payload[51] = 0x02;
        payload
    }

    fn names_reply(&self, request: &[u8], extended: bool) -> Vec<u8> {
        let tag = request.get(2).copied().unwrap_or(0);
        let start = u16::from_le_bytes([
            request.get(3).copied().unwrap_or(0),
            request.get(4).copied().unwrap_or(0),
        ]);
        let (page_size, name_len, msg_id) =
            if extended { (4u16, 30usize, 0x15u8) } else { (16, 16, 0x10) };

        let mut payload = vec![msg_id, tag, page_size as u8];
        for i in 0..page_size {
            let id = start + i + 1;
            if extended {
                payload.extend_from_slice(&id.to_le_bytes());
            } else {
                payload.push((id & 0xFF) as u8);
            }
            let name = self.config.names.get(&(tag, id)).cloned().unwrap_or_default();
            let mut field = vec![0u8; name_len];
            let bytes = name.as_bytes();
            field[..bytes.len().min(name_len)]
                .copy_from_slice(&bytes[..bytes.len().min(name_len)]);
            payload.extend_from_slice(&field);
        }
        let mut out = vec![0xA0];
        out.extend_from_slice(&payload);
        out
    }

    fn status_payload(&self, kind_tag: u8, id: u16) -> Vec<u8> {
        let response_len = EntityKind::from_tag(kind_tag)
            .map_or(5, EntityKind::status_response_len);
        let mut payload = vec![0x31, kind_tag, 0x00, (id & 0xFF) as u8];
        let data = self
            .config
            .statuses
            .get(&(kind_tag, id))
            .cloned()
            .unwrap_or_else(|| vec![0u8; response_len - 4]);
        payload.extend_from_slice(&data);
        payload.truncate(response_len);
        while payload.len() < response_len {
            payload.push(0);
        }
        payload
    }

    fn zones_assigned_payload(&self, area: u16) -> Vec<u8> {
        let zones = self.config.zones_by_area.get(&area).cloned().unwrap_or_default();
        let mut payload = vec![0x32, 0x02];
        payload.extend_from_slice(&bitmap(&zones, 30));
        payload
    }

    fn verb_reply(&mut self, request: &[u8]) -> Vec<u8> {
        match request.get(2).copied().unwrap_or(0) {
            0x01 => {
                self.stats.arms_sent.fetch_add(1, Ordering::SeqCst);
                self.issue_cursor = 0;
                vec![0xA0, 0x00, 0x00]
            },
            0x0F => {
                self.stats.forces_sent.fetch_add(1, Ordering::SeqCst);
                vec![0xA0, 0x00, 0x00]
            },
            0x03..=0x08 => {
                vec![0xA0, 0x46, 0x01, u8::from(self.config.boolean_verb_ok)]
            },
            0x09..=0x0E => vec![0xA0, 0x00, 0x01, 0x00],
            // disarm and anything else succeed silently
            _ => vec![0xA0, 0x00, 0x00],
        }
    }

    fn issue_reply(&mut self, request: &[u8]) -> Vec<u8> {
        if request.get(3) == Some(&0) {
            self.issue_cursor = 0;
        }
        match self.config.issue_zones.get(self.issue_cursor) {
            Some(&zone) => {
                self.issue_cursor += 1;
                vec![0xA0, 0x45, request.get(2).copied().unwrap_or(1), (zone & 0xFF) as u8]
            },
            None => vec![0xA0, 0x46, 0x01, 0x00],
        }
    }

    fn log_entry_reply(&mut self, direction: u8) -> Vec<u8> {
        if direction == 0 {
            self.log_cursor = 0;
        } else {
            self.log_cursor += 1;
        }
        let record = match self.config.log_records.get(self.log_cursor) {
            Some(record) => record.clone(),
            None => self
                .config
                .log_records
                .last()
                .cloned()
                .unwrap_or_else(|| vec![0u8; 70]),
        };
        let mut payload = vec![0xA0, 0x0D];
        payload.extend_from_slice(&record);
        payload
    }

    fn batch_reply(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        // [0xC0][EE E0 EE EE][len][emb1][sep][emb2]...
        let body_len = usize::from(*request.get(5)?);
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut pos = 6;
        while pos + body_len <= request.len() {
            let emb = &request[pos..pos + body_len];
            let part = match emb.first()? {
                0x31 => self.status_payload(
                    emb.get(1).copied()?,
                    u16::from(emb.get(3).copied()?),
                ),
                0x32 => self.zones_assigned_payload(u16::from(emb.get(3).copied()?)),
                _ => return None,
            };
            parts.push(part);
            pos += body_len;
            match request.get(pos) {
                Some(&sep) if usize::from(sep) == body_len => pos += 1,
                _ => break,
            }
        }

        let type_indicator = parts.first()?.len() as u8;
        let mut out = vec![0xA0, 0xEE, 0xEE, type_indicator];
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push(type_indicator);
            }
            out.extend_from_slice(part);
        }
        Some(out)
    }
}

fn ascii_at(buf: &[u8], at: usize, len: usize) -> String {
    buf.get(at..at + len)
        .map(|bytes| {
            bytes.iter().filter(|&&b| b != 0).map(|&b| char::from(b)).collect()
        })
        .unwrap_or_default()
}

fn write_ascii(buf: &mut [u8], at: usize, len: usize, text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len);
    buf[at..at + n].copy_from_slice(&bytes[..n]);
}

fn bitmap(numbers: &[u16], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for &n in numbers {
        if n == 0 {
            continue;
        }
        let idx = usize::from(n - 1);
        if idx / 8 < len {
            out[idx / 8] |= 1 << (idx % 8);
        }
    }
    out
}
