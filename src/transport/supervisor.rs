use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::protocol::command::{Command, InboundBuffer};

use super::{ConnectionStatus, Link};

/// Callback invoked on the supervisor thread for every downlink command.
pub type CommandHandler = Box<dyn FnMut(&Command) + Send>;

/// Handler slot shared between the client and its supervisor.
pub type SharedHandler = Arc<Mutex<Option<CommandHandler>>>;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const READ_SIZE: usize = 1024;

const STOP_POLL: Duration = Duration::from_millis(10);
const STOP_POLLS: u32 = 300;

/// Background thread that keeps a [`Link`] healthy and turns its inbound bytes into
/// commands.
///
/// Every cycle starts with a fresh [`Link::status`]. A disconnected or failed link is
/// torn down and reopened, then the supervisor backs off before polling again. A
/// connected link gets one read; any bytes are reassembled in an [`InboundBuffer`] and
/// each complete command is handed to the registered handler in arrival order.
pub struct LinkSupervisor<L: Link> {
    link: Arc<L>,
    running: Arc<AtomicBool>,
    handler: SharedHandler,
    backoff: Duration,
    handle: Option<JoinHandle<()>>,
}

impl<L: Link> LinkSupervisor<L> {
    pub fn new(link: Arc<L>, handler: SharedHandler) -> Self {
        Self {
            link,
            running: Arc::new(AtomicBool::new(false)),
            handler,
            backoff: DEFAULT_BACKOFF,
            handle: None,
        }
    }

    /// Pause after a reconnect attempt or while the link is still connecting.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the supervisor thread. Returns `false` if it is already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if let Some(finished) = self.handle.take() {
            let _ = finished.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let worker = Worker {
            link: Arc::clone(&self.link),
            running: Arc::clone(&self.running),
            handler: Arc::clone(&self.handler),
            backoff: self.backoff,
        };
        self.handle = Some(thread::spawn(move || worker.run()));
        debug!("link supervisor started");
        true
    }

    /// Stops the thread and waits for it.
    ///
    /// The link is interrupted so a pending read returns early. If the thread is still
    /// alive after three seconds the link is closed underneath it before joining.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.link.interrupt();

        let mut polls = 0;
        while !handle.is_finished() && polls < STOP_POLLS {
            thread::sleep(STOP_POLL);
            polls += 1;
        }
        if !handle.is_finished() {
            warn!("link supervisor did not stop in time, closing the link");
            if let Err(e) = self.link.disconnect() {
                warn!("forced close failed: {e}");
            }
        }

        if handle.join().is_err() {
            error!("link supervisor panicked");
        }
        debug!("link supervisor stopped");
    }
}

impl<L: Link> Drop for LinkSupervisor<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<L: Link> {
    link: Arc<L>,
    running: Arc<AtomicBool>,
    handler: SharedHandler,
    backoff: Duration,
}

impl<L: Link> Worker<L> {
    fn run(self) {
        let mut inbound = InboundBuffer::new();

        while self.running.load(Ordering::SeqCst) {
            match self.link.status() {
                status @ (ConnectionStatus::Disconnected | ConnectionStatus::Error) => {
                    error!("link {status}, reconnecting");
                    if let Err(e) = self.link.disconnect() {
                        debug!("closing stale link: {e}");
                    }
                    if let Err(e) = self.link.connect() {
                        error!("reconnect failed: {e}");
                    }
                    inbound.clear();
                    thread::sleep(self.backoff);
                }
                ConnectionStatus::Connecting => {
                    debug!("link still connecting");
                    thread::sleep(self.backoff);
                }
                ConnectionStatus::Connected => {
                    let data = self.link.read(READ_SIZE);
                    if data.is_empty() {
                        continue;
                    }
                    inbound.push(&data);
                    for command in inbound.drain_commands() {
                        self.dispatch(&command);
                    }
                }
            }
        }
        debug!("link supervisor exiting");
    }

    /// Runs the handler with its slot unlocked, so it may replace itself.
    fn dispatch(&self, command: &Command) {
        let taken = self.slot().take();
        let Some(mut handler) = taken else {
            info!("received command: {command}");
            return;
        };
        handler(command);

        let mut slot = self.slot();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CommandHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Instant};

    use super::*;
    use crate::transport::mock::{Event, MockLink};

    fn supervisor(link: &Arc<MockLink>, handler: SharedHandler) -> LinkSupervisor<MockLink> {
        LinkSupervisor::new(Arc::clone(link), handler).with_backoff(Duration::from_millis(10))
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn reconnects_after_each_disconnected_poll() {
        let link = Arc::new(MockLink::new().script([ConnectionStatus::Disconnected; 3]));
        link.connect().unwrap();
        let mut supervisor = supervisor(&link, SharedHandler::default());

        assert!(supervisor.start());
        wait_until(|| link.events().contains(&Event::Status(ConnectionStatus::Connected)));
        supervisor.stop();

        let events = link.events();
        assert_eq!(
            &events[..11],
            &[
                Event::Connect(1),
                Event::Status(ConnectionStatus::Disconnected),
                Event::Disconnect,
                Event::Connect(2),
                Event::Status(ConnectionStatus::Disconnected),
                Event::Disconnect,
                Event::Connect(3),
                Event::Status(ConnectionStatus::Disconnected),
                Event::Disconnect,
                Event::Connect(4),
                Event::Status(ConnectionStatus::Connected),
            ]
        );
        assert_eq!(link.generation(), 4);
        assert!(events.contains(&Event::Interrupt));
    }

    #[test]
    fn connecting_link_is_left_alone() {
        let link = Arc::new(MockLink::new().script([ConnectionStatus::Connecting; 2]));
        link.connect().unwrap();
        let mut supervisor = supervisor(&link, SharedHandler::default());

        supervisor.start();
        wait_until(|| link.events().contains(&Event::Status(ConnectionStatus::Connected)));
        supervisor.stop();

        assert!(!link.events().contains(&Event::Disconnect));
        assert_eq!(link.generation(), 1);
    }

    #[test]
    fn dispatches_commands_in_order() {
        let link = Arc::new(MockLink::new());
        link.connect().unwrap();
        link.push_inbound(b"SET PIP:1.2.3.4\r\nGE");
        link.push_inbound(b"T UR\r\nCLR VN");

        let (tx, rx) = mpsc::channel();
        let handler: CommandHandler = Box::new(move |command: &Command| {
            tx.send(command.to_string()).unwrap();
        });
        let mut supervisor = supervisor(&link, Arc::new(Mutex::new(Some(handler))));
        supervisor.start();

        let received: Vec<String> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        supervisor.stop();

        assert_eq!(received, ["SET PIP:1.2.3.4", "GET UR", "CLR VN"]);
    }

    #[test]
    fn handler_can_replace_itself() {
        let link = Arc::new(MockLink::new());
        link.connect().unwrap();
        link.push_inbound(b"SET UR:10\r\n");

        let (tx, rx) = mpsc::channel();
        let shared = SharedHandler::default();
        let slot = Arc::clone(&shared);
        let first: CommandHandler = Box::new(move |command: &Command| {
            tx.send(format!("first {command}")).unwrap();
            let tx = tx.clone();
            let second: CommandHandler = Box::new(move |command: &Command| {
                tx.send(format!("second {command}")).unwrap();
            });
            *slot.lock().unwrap() = Some(second);
        });
        *shared.lock().unwrap() = Some(first);

        let mut supervisor = supervisor(&link, shared);
        supervisor.start();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "first SET UR:10"
        );

        link.push_inbound(b"GET UR\r\n");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "second GET UR"
        );
        supervisor.stop();
    }

    #[test]
    fn start_is_idempotent() {
        let link = Arc::new(MockLink::new());
        link.connect().unwrap();
        let mut supervisor = supervisor(&link, SharedHandler::default());

        assert!(supervisor.start());
        assert!(!supervisor.start());
        assert!(supervisor.is_running());

        supervisor.stop();
        assert!(!supervisor.is_running());
        assert!(supervisor.start());
        supervisor.stop();
    }

    #[test]
    fn stop_without_start() {
        let link = Arc::new(MockLink::new());
        let mut supervisor = supervisor(&link, SharedHandler::default());
        supervisor.stop();
        assert!(link.events().is_empty());
    }

    #[test]
    fn stuck_read_is_forced_closed() {
        let link = Arc::new(MockLink::new().sticky_reads());
        link.connect().unwrap();
        let mut supervisor = supervisor(&link, SharedHandler::default());
        supervisor.start();
        wait_until(|| link.events().contains(&Event::Status(ConnectionStatus::Connected)));

        let started = Instant::now();
        supervisor.stop();

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(!supervisor.is_running());
        assert_eq!(
            &link.events()[link.events().len() - 2..],
            &[Event::Interrupt, Event::Disconnect]
        );
    }
}
