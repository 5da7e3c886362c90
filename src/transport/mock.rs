//! Scripted [`Link`] used by the supervisor and client tests.
use std::{
    collections::VecDeque,
    io::{self, ErrorKind},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use super::{ConnectionStatus, Link, TransportError};

const IDLE_READ: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Status(ConnectionStatus),
    /// Carries the generation of the socket that was opened.
    Connect(u32),
    Disconnect,
    Send(usize),
    Interrupt,
}

#[derive(Debug, Default)]
pub(crate) struct MockLink {
    events: Mutex<Vec<Event>>,
    statuses: Mutex<VecDeque<ConnectionStatus>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    generation: AtomicU32,
    open: AtomicBool,
    acked: AtomicU64,
    acknowledging: AtomicBool,
    refusing: AtomicBool,
    sticky_reads: AtomicBool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses reported before falling back to the open/closed state.
    pub fn script(self, statuses: impl IntoIterator<Item = ConnectionStatus>) -> Self {
        self.statuses.lock().unwrap().extend(statuses);
        self
    }

    /// Sends are acknowledged in full as soon as they are written.
    pub fn acknowledging(self) -> Self {
        self.acknowledging.store(true, Ordering::SeqCst);
        self
    }

    pub fn refusing(self) -> Self {
        self.refusing.store(true, Ordering::SeqCst);
        self
    }

    /// Reads ignore [`Link::interrupt`] and only return once the link is closed.
    pub fn sticky_reads(self) -> Self {
        self.sticky_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.inbound.lock().unwrap().push_back(data.to_vec());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|record| String::from_utf8_lossy(record).into_owned())
            .collect()
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Link for MockLink {
    fn connect(&self) -> Result<(), TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::from(ErrorKind::ConnectionRefused).into());
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.open.store(true, Ordering::SeqCst);
        self.record(Event::Connect(generation));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.record(Event::Disconnect);
        Ok(())
    }

    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        if self.acknowledging.load(Ordering::SeqCst) {
            self.acked.fetch_add(data.len() as u64, Ordering::SeqCst);
        }
        self.record(Event::Send(data.len()));
        Ok(())
    }

    fn read(&self, _bufsize: usize) -> Vec<u8> {
        if self.sticky_reads.load(Ordering::SeqCst) {
            while self.open.load(Ordering::SeqCst) {
                thread::sleep(IDLE_READ);
            }
            return Vec::new();
        }
        if let Some(data) = self.inbound.lock().unwrap().pop_front() {
            return data;
        }
        thread::sleep(IDLE_READ);
        Vec::new()
    }

    fn status(&self) -> ConnectionStatus {
        let scripted = self.statuses.lock().unwrap().pop_front();
        let status = scripted.unwrap_or(if self.open.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Error
        });
        self.record(Event::Status(status));
        status
    }

    fn acked_bytes(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.record(Event::Interrupt);
    }
}
