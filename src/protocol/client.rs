use std::{
    sync::{Arc, PoisonError},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    config::{ClientConfig, ConfigError},
    protocol::{
        command::Command,
        packet::{Emergency, FrameCounter, Heartbeat, LocationAlert, Login, OutboundPacket},
    },
    transport::{CommandHandler, ConnectionStatus, Link, LinkSupervisor, SharedHandler, Transport},
};

/// Interval between acknowledgment checks while a send waits.
pub const ACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// AIS-140 device session over one [`Link`].
///
/// `connect` opens the link and starts a [`LinkSupervisor`] that keeps it open and
/// delivers downlink commands to the callback. Sends run on the caller's thread and
/// report failure as `false` with a log line; only configuration errors are returned
/// as values.
pub struct AisClient<L: Link = Transport> {
    link: Arc<L>,
    supervisor: LinkSupervisor<L>,
    handler: SharedHandler,
    frames: FrameCounter,
    ack_timeout: Duration,
}

impl AisClient<Transport> {
    /// Validates `config` and builds an unconnected client on a [`Transport`].
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ack_timeout = config.ack_timeout;
        Ok(Self::with_link(Transport::new(config), ack_timeout))
    }
}

impl<L: Link> AisClient<L> {
    pub fn with_link(link: L, ack_timeout: Duration) -> Self {
        let link = Arc::new(link);
        let handler = SharedHandler::default();
        let supervisor = LinkSupervisor::new(Arc::clone(&link), Arc::clone(&handler));
        Self {
            link,
            supervisor,
            handler,
            frames: FrameCounter::new(),
            ack_timeout,
        }
    }

    /// Pause used by the supervisor between reconnect attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.supervisor.stop();
        self.supervisor =
            LinkSupervisor::new(Arc::clone(&self.link), Arc::clone(&self.handler)).with_backoff(backoff);
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn set_ack_timeout(&mut self, timeout: Duration) {
        self.ack_timeout = timeout;
    }

    /// Opens the link and starts the supervisor.
    ///
    /// Returns `false` when already connected or when the link cannot be opened.
    pub fn connect(&mut self) -> bool {
        if self.supervisor.is_running() {
            warn!("client already connected");
            return false;
        }
        if let Err(e) = self.link.connect() {
            error!("failed to connect: {e}");
            return false;
        }
        self.supervisor.start()
    }

    /// Stops the supervisor, then closes the link.
    pub fn disconnect(&mut self) -> bool {
        self.supervisor.stop();
        match self.link.disconnect() {
            Ok(()) => true,
            Err(e) => {
                error!("failed to disconnect: {e}");
                false
            }
        }
    }

    /// Replaces the handler for downlink commands.
    ///
    /// The handler runs on the supervisor thread and must return promptly. It may call
    /// `set_callback` itself.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&Command) + Send + 'static,
    {
        let handler: CommandHandler = Box::new(callback);
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn send_login(&self, login: &Login) -> bool {
        self.send_packet(&OutboundPacket::Login(login), self.ack_timeout)
    }

    pub fn send_heartbeat(&self, heartbeat: &Heartbeat) -> bool {
        self.send_packet(&OutboundPacket::Heartbeat(heartbeat), self.ack_timeout)
    }

    /// Sends `alert` under the next frame number.
    pub fn send_location_alert(&self, alert: &LocationAlert) -> bool {
        let frame = self.frames.next();
        self.send_packet(&OutboundPacket::LocationAlert(alert, frame), self.ack_timeout)
    }

    pub fn send_emergency(&self, emergency: &Emergency) -> bool {
        self.send_packet(&OutboundPacket::Emergency(emergency), self.ack_timeout)
    }

    /// Writes one record and waits up to `timeout` for the peer to acknowledge all of it.
    ///
    /// A zero timeout returns as soon as the record is written.
    pub fn send_packet(&self, packet: &OutboundPacket<'_>, timeout: Duration) -> bool {
        let record = packet.encode();
        let len = record.len() as u64;
        let before = self.link.acked_bytes();

        if let Err(e) = self.link.send(record.as_bytes()) {
            error!("failed to send {} record: {e}", packet.tag());
            return false;
        }
        debug!("sent {record}");
        if timeout.is_zero() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let acked = self.link.acked_bytes().saturating_sub(before);
            if acked >= len {
                info!("{} record acknowledged", packet.tag());
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} record not acknowledged within {timeout:?} ({acked} of {len} bytes)",
                    packet.tag()
                );
                return false;
            }
            thread::sleep(ACK_POLL_INTERVAL);
        }
    }
}
