//! Connection lifecycle: boot, key exchange, login, keep-alive, teardown.
//!
//! The handshake runs in a fixed order. `device_info` goes out in the
//! plain pre-session framing and yields the panel descriptor. The initial
//! key (derived from the configured password) protects `create_session`
//! and `enable_encryption` — only after the latter's reply does the
//! combined session key take over. Login then authenticates with a PIN or
//! an account depending on the panel family.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use atslink_crypto::{derive_initial_key, session_key};
use atslink_proto::messages::{
    CREATE_SESSION, CREATE_SESSION_PANEL_KEY, DEVICE_INFO, ENABLE_ENCRYPTION, LOGIN_ACCOUNT,
    LOGIN_PIN, LOGOUT, PING, SIMPLE_RESPONSE, USER_INFO, USER_INFO_NAME,
};
use atslink_proto::template::{Template, Value, fixed_str};
use atslink_proto::EntityKind;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::{Auth, ClientConfig};
use crate::error::ClientError;
use crate::inventory::Inventory;
use crate::panel::PanelInfo;
use crate::transport::Transport;

/// An authenticated connection to one panel.
///
/// All state is private to the connection; two clients never share
/// anything. Methods that refresh the entity caches take `&mut self`.
pub struct Client {
    pub(crate) transport: Arc<Transport>,
    pub(crate) config: ClientConfig,
    pub(crate) panel: PanelInfo,
    pub(crate) inventory: Inventory,
    /// Latest raw status bytes per entity; updated only after a
    /// successful read.
    pub(crate) states: HashMap<(EntityKind, u16), Vec<u8>>,
    pub(crate) cos_rx: Option<mpsc::Receiver<Vec<u8>>>,
    user_name: Option<String>,
    keepalive: Option<tokio::task::JoinHandle<()>>,
}

impl Client {
    /// Connect, handshake, and log in.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(Transport::connect(&config.addr(), config.call_timeout).await?);

        // Boot query, plain framing
        let reply = transport.call_plain(&DEVICE_INFO.construct(&[])?, true).await?;
        let panel = PanelInfo::from_payload(response_payload(&reply)?)?;
        info!(
            product = %panel.product,
            firmware = %panel.firmware,
            protocol = ?panel.protocol_version,
            "connected to panel"
        );
        transport.set_serial(panel.serial);

        // Key exchange under the initial key
        if config.encryption_key.len() < 24 {
            warn!("encryption key is shorter than 24 characters; falling back to the zero key");
        }
        transport.set_key(derive_initial_key(&config.encryption_key));

        let reply = transport.call_encrypted(&CREATE_SESSION.construct(&[])?, true).await?;
        let payload = response_payload(&reply)?;
        let panel_half: [u8; 8] = payload
            .get(CREATE_SESSION_PANEL_KEY)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| ClientError::KeyExchange {
                reason: format!("create_session reply too short ({} bytes)", payload.len()),
            })?;

        // Our half is all zeros by design; the panel's half carries the
        // session entropy
        let client_half = [0u8; 8];

        // The enable call itself still runs under the initial key; only
        // after its reply does the session key take over
        transport.call_encrypted(&ENABLE_ENCRYPTION.construct(&[])?, true).await?;
        transport.set_key(session_key(&client_half, &panel_half));
        debug!("session key established");

        let cos_rx = transport.take_cos_receiver();

        let mut client = Self {
            transport,
            panel,
            inventory: Inventory::default(),
            states: HashMap::new(),
            cos_rx,
            user_name: None,
            keepalive: None,
            config,
        };

        client.login().await?;
        client.keepalive = Some(spawn_keepalive(
            Arc::clone(&client.transport),
            client.config.keepalive_interval,
        ));

        Ok(client)
    }

    async fn login(&mut self) -> Result<(), ClientError> {
        let auth = self.config.auth.clone();
        let reply = match &auth {
            Auth::Pin(pin) => {
                self.call(&LOGIN_PIN, &[("pin", Value::Str(pin.clone()))]).await?
            },
            Auth::Account { username, password } => {
                self.call(&LOGIN_ACCOUNT, &[
                    ("username", Value::Str(username.clone())),
                    ("password", Value::Str(password.clone())),
                ])
                .await?
            },
        };

        // Success is the generic status reply `a0 00 00`
        let payload = response_payload(&reply)?;
        if !SIMPLE_RESPONSE.matches(payload, 0) {
            return Err(ClientError::MalformedResponse {
                operation: "login",
                reason: format!("unexpected reply {payload:02x?}"),
            });
        }
        let status = SIMPLE_RESPONSE
            .get(payload, "status")?
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ClientError::MalformedResponse {
                operation: "login",
                reason: "no status byte in reply".to_string(),
            })?;
        if status != 0 {
            return Err(ClientError::LoginRejected { status: status as u8 });
        }
        info!("login accepted");

        // Account logins additionally activate the session's permissions
        if matches!(auth, Auth::Account { .. }) {
            let reply = self.call(&USER_INFO, &[]).await?;
            let payload = response_payload(&reply)?;
            let (at, len) = USER_INFO_NAME;
            self.user_name = fixed_str(payload, at, len).filter(|n| !n.is_empty());
            debug!(user = ?self.user_name, "session activated");
        }
        Ok(())
    }

    /// Panel descriptor from the boot query.
    #[must_use]
    pub fn panel(&self) -> &PanelInfo {
        &self.panel
    }

    /// Panel user name, known after an account login.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Entity names, valid sets and the zone-to-areas map loaded by
    /// [`Self::load_inventory`].
    #[must_use]
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Log out and close the connection.
    ///
    /// The logout is best-effort: a panel that already dropped the link
    /// only costs us a log line.
    pub async fn disconnect(mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
        match LOGOUT.construct(&[]) {
            Ok(request) => {
                if let Err(e) = self.transport.send_encrypted(&request).await {
                    debug!(error = %e, "logout not delivered during disconnect");
                }
            },
            Err(e) => debug!(error = %e, "could not construct logout"),
        }
        self.transport.shutdown().await;
    }

    /// Construct and send `template` encrypted; error responses raise
    /// [`ClientError::Panel`].
    pub(crate) async fn call(
        &self,
        template: &Template,
        props: &[(&str, Value)],
    ) -> Result<Vec<u8>, ClientError> {
        let request = template.construct(props)?;
        self.transport.call_encrypted(&request, true).await
    }

    /// Like [`Self::call`] but error responses are returned for the
    /// caller to inspect.
    pub(crate) async fn call_no_throw(
        &self,
        template: &Template,
        props: &[(&str, Value)],
    ) -> Result<Vec<u8>, ClientError> {
        let request = template.construct(props)?;
        self.transport.call_encrypted(&request, false).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

/// Payload view of a response: everything after the header byte.
pub(crate) fn response_payload(plaintext: &[u8]) -> Result<&[u8], ClientError> {
    plaintext.get(1..).ok_or_else(|| ClientError::MalformedResponse {
        operation: "response",
        reason: "empty frame".to_string(),
    })
}

/// Name map sorted by entity number, for rendering.
pub type NameMap = BTreeMap<u16, String>;

fn spawn_keepalive(
    transport: Arc<Transport>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            ticker.tick().await;
            let Ok(request) = PING.construct(&[]) else {
                return;
            };
            // Failures are logged only; the next real command surfaces them
            match transport.call_encrypted(&request, true).await {
                Ok(_) => trace!("keep-alive ping answered"),
                Err(e) => warn!(error = %e, "keep-alive ping failed"),
            }
        }
    })
}
