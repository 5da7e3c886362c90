use std::{
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, mpsc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use thiserror::Error;

use super::{
    command::{Command, CommandError},
    packet::{Emergency, RECORD_START, Record},
    thread::{PoolError, WorkerPool},
};

pub const DEFAULT_PORT: u16 = 31500;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_DOWNLINK_INTERVAL: Duration = Duration::from_secs(1);

const BUF_SIZE: usize = 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(10);
/// How often an idle session checks the shutdown flag.
const SESSION_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket fault: {0}")]
    Io(#[from] io::Error),

    #[error("invalid downlink command: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Parses one downlink command per entry.
pub fn parse_downlink<I, S>(lines: I) -> Result<Vec<Command>, ServerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|line| Command::try_from(line.as_ref()).map_err(ServerError::from))
        .collect()
}

/// TCP peer for AIS-140 devices.
///
/// Each accepted device is served on the worker pool. Received records are logged
/// and optionally forwarded to an inbox channel. When a device reports an emergency
/// the server answers with its downlink commands, one per interval.
pub struct TrackingServer {
    listener: TcpListener,
    pool: WorkerPool,
    downlink: Arc<Vec<Command>>,
    interval: Duration,
    inbox: Option<mpsc::Sender<String>>,
    shutdown: Arc<AtomicBool>,
}

impl TrackingServer {
    pub fn bind(address: impl ToSocketAddrs, workers: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            pool: WorkerPool::new(workers),
            downlink: Arc::new(Vec::new()),
            interval: DEFAULT_DOWNLINK_INTERVAL,
            inbox: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Commands written back after every emergency record, `interval` apart.
    pub fn with_downlink(mut self, commands: Vec<Command>, interval: Duration) -> Self {
        self.downlink = Arc::new(commands);
        self.interval = interval;
        self
    }

    /// Forwards every received record to `inbox`.
    pub fn with_inbox(mut self, inbox: mpsc::Sender<String>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Flag that stops [`TrackingServer::listen`] and every open session once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn listen(self) -> Result<(), ServerError> {
        info!("listening at {}", self.local_addr()?);
        self.listener.set_nonblocking(true)?;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    let session = Session {
                        stream,
                        peer,
                        downlink: Arc::clone(&self.downlink),
                        interval: self.interval,
                        inbox: self.inbox.clone(),
                        shutdown: Arc::clone(&self.shutdown),
                    };
                    self.pool.execute(move || {
                        if let Err(e) = session.run() {
                            warn!("session with {peer} failed: {e}");
                        }
                    })?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("shutting down");
        Ok(())
    }
}

struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    downlink: Arc<Vec<Command>>,
    interval: Duration,
    inbox: Option<mpsc::Sender<String>>,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    fn run(mut self) -> Result<(), ServerError> {
        info!("device connected from {}", self.peer);
        self.stream.set_read_timeout(Some(SESSION_POLL))?;
        let mut buf = [0u8; BUF_SIZE];

        while !self.shutdown.load(Ordering::SeqCst) {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    info!("device {} disconnected", self.peer);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            for record in split_records(&text) {
                self.handle_record(record)?;
            }
        }
        Ok(())
    }

    fn handle_record(&mut self, record: &str) -> Result<(), ServerError> {
        info!("received from {}: {record}", self.peer);
        if let Some(inbox) = &self.inbox {
            let _ = inbox.send(record.to_string());
        }

        if record_tag(record) == Some(Emergency::TAG) {
            for command in self.downlink.iter() {
                debug!("sending {command} to {}", self.peer);
                self.stream.write_all(command.to_string().as_bytes())?;
                thread::sleep(self.interval);
            }
        }
        Ok(())
    }
}

/// Splits a chunk into records at every `$,`; text before the first one is kept as is.
fn split_records(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = text.match_indices(RECORD_START).map(|(i, _)| i).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts
        .iter()
        .zip(starts.iter().skip(1).copied().chain([text.len()]))
        .map(|(&start, end)| text[start..end].trim())
        .filter(|record| !record.is_empty())
        .collect()
}

fn record_tag(record: &str) -> Option<&str> {
    record
        .strip_prefix(RECORD_START)?
        .split(',')
        .next()
        .filter(|tag| !tag.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn splits_concatenated_records() {
        let records = split_records("$,LGN,A,B*$,HBT,C*\r\n$,EPB,D*1A2B");
        assert_eq!(records, ["$,LGN,A,B*", "$,HBT,C*", "$,EPB,D*1A2B"]);
    }

    #[test]
    fn keeps_leading_noise() {
        assert_eq!(split_records("noise$,LGN,A*"), ["noise", "$,LGN,A*"]);
        assert!(split_records("").is_empty());
    }

    #[test]
    fn tags() {
        assert_eq!(record_tag("$,EPB,V1*ABC"), Some("EPB"));
        assert_eq!(record_tag("$,LGN*"), Some("LGN*"));
        assert_eq!(record_tag("LGN,V1"), None);
    }

    #[test]
    fn downlink_parsing() {
        let commands = parse_downlink(["SET PPT:8011", "SET EO", "GET UR"]).unwrap();
        assert_eq!(commands[0].to_string(), "SET PPT:8011");
        assert_eq!(commands[2].key, "UR");
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn downlink_rejects_garbage() {
        parse_downlink(["PUT PPT:8011"]).unwrap();
    }

    #[test]
    fn answers_emergency_with_downlink() {
        let (inbox, records) = mpsc::channel();
        let server = TrackingServer::bind("127.0.0.1:0", 2)
            .unwrap()
            .with_downlink(parse_downlink(["SET EO", "GET UR"]).unwrap(), Duration::ZERO)
            .with_inbox(inbox);
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let listener = thread::spawn(move || server.listen());

        let mut device = TcpStream::connect(addr).unwrap();
        device.write_all(b"$,LGN,V1*").unwrap();
        assert_eq!(
            records.recv_timeout(Duration::from_secs(5)).unwrap(),
            "$,LGN,V1*"
        );

        device.write_all(b"$,EPB,V1*0").unwrap();
        assert_eq!(
            records.recv_timeout(Duration::from_secs(5)).unwrap(),
            "$,EPB,V1*0"
        );

        device
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut downlink = Vec::new();
        let mut buf = [0u8; 64];
        while downlink.len() < b"SET EOGET UR".len() && Instant::now() < deadline {
            if let Ok(n) = device.read(&mut buf) {
                downlink.extend_from_slice(&buf[..n]);
            }
        }
        assert_eq!(downlink, b"SET EOGET UR");

        drop(device);
        shutdown.store(true, Ordering::SeqCst);
        listener.join().unwrap().unwrap();
    }
}
