//! Session management
//!
//! One session per WebSocket connection. A session owns the connection's
//! pseudo terminal and the UI instance mounted on it, and moves through
//!
//! ```text
//! Open ──resize──> Running ──resize──> Running (clear, unmount, remount)
//!   │                 │
//!   └─────close───────┴──────> Closed
//! ```
//!
//! Input arriving while `Open` is queued on the device so the first
//! instance sees every keystroke typed before the size handshake.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, info};

use super::codec::{self, ControlFrame, Dimensions, Framing, WireMessage};
use super::device::{OutputSink, PseudoTerminal};
use super::runtime::{AppInstance, TerminalApp};

/// Clear the screen and home the cursor
pub const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";

/// Unique identifier for a session
pub type SessionId = u64;

/// Session lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Device exists, no UI mounted yet
    Open,
    /// A UI instance is mounted with the current dimensions
    Running,
    /// Connection gone, UI released
    Closed,
}

/// Per-session behaviour, shared by every session of a server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub framing: Framing,
    /// Mount with `placeholder` dimensions before the first resize
    pub mount_on_open: bool,
    /// Send [`CLEAR_SCREEN`] before remounting
    pub clear_on_remount: bool,
    /// Dimensions reported until the client sends its own
    pub placeholder: Dimensions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            mount_on_open: false,
            clear_on_remount: true,
            placeholder: Dimensions::default(),
        }
    }
}

/// Diagnostic counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub mounts: u64,
    pub unmounts: u64,
    pub resizes: u64,
    pub frames_dropped: u64,
    pub bytes_in: u64,
}

/// A browser terminal session
pub struct Session<A: TerminalApp> {
    /// Session ID
    pub id: SessionId,
    app: Rc<A>,
    tty: PseudoTerminal,
    ui_state: Rc<RefCell<A::State>>,
    instance: Option<A::Instance>,
    state: SessionState,
    options: SessionOptions,
    stats: SessionStats,
}

impl<A: TerminalApp> Session<A> {
    /// Create a session writing its output to `sink`
    pub fn new(id: SessionId, app: Rc<A>, sink: OutputSink, options: SessionOptions) -> Self {
        let tty = PseudoTerminal::new(sink, options.placeholder);
        let ui_state = Rc::new(RefCell::new(app.new_state()));
        let mut session = Self {
            id,
            app,
            tty,
            ui_state,
            instance: None,
            state: SessionState::Open,
            options,
            stats: SessionStats::default(),
        };

        if options.mount_on_open {
            session.mount();
            session.state = SessionState::Running;
        }
        session
    }

    #[allow(dead_code)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[allow(dead_code)]
    pub fn dimensions(&self) -> Dimensions {
        self.tty.dimensions()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    #[allow(dead_code)]
    pub fn device(&self) -> &PseudoTerminal {
        &self.tty
    }

    /// UI state shared by the instances mounted in this session
    #[allow(dead_code)]
    pub fn ui_state(&self) -> &Rc<RefCell<A::State>> {
        &self.ui_state
    }

    /// Decode and apply one inbound message. Malformed control frames are
    /// dropped without changing state.
    pub fn handle_message(&mut self, message: WireMessage) {
        if self.state == SessionState::Closed {
            debug!(session = self.id, "ignoring message for closed session");
            return;
        }
        match codec::decode(message, self.options.framing) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                self.stats.frames_dropped += 1;
                debug!(session = self.id, "dropping malformed control frame: {}", e);
            }
        }
    }

    /// Apply an already classified frame
    pub fn handle_frame(&mut self, frame: ControlFrame) {
        match frame {
            ControlFrame::Resize(dimensions) => self.resize(dimensions),
            ControlFrame::Data(bytes) => self.deliver(bytes),
        }
    }

    fn resize(&mut self, dimensions: Dimensions) {
        if self.state == SessionState::Closed {
            return;
        }
        self.stats.resizes += 1;

        // Without a mounted instance this is the first mount, not a remount
        let remount = self.instance.is_some();
        if remount {
            if self.options.clear_on_remount {
                self.tty.write_bytes(CLEAR_SCREEN);
            }
            self.unmount();
        }
        self.tty.set_dimensions(dimensions);
        self.mount();
        self.state = SessionState::Running;

        if remount {
            info!(session = self.id, "Remounted at {}", dimensions);
        } else {
            info!(session = self.id, "Mounted at {}", dimensions);
        }
    }

    fn deliver(&mut self, bytes: Bytes) {
        if self.state == SessionState::Closed {
            return;
        }
        self.stats.bytes_in += bytes.len() as u64;
        self.tty.push(bytes);
    }

    fn mount(&mut self) {
        let instance = self.app.mount(self.tty.clone(), Rc::clone(&self.ui_state));
        self.instance = Some(instance);
        self.stats.mounts += 1;
    }

    fn unmount(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.unmount();
            self.stats.unmounts += 1;
        }
    }

    /// Tear the session down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.unmount();
        self.tty.detach();
        self.state = SessionState::Closed;
        info!(
            session = self.id,
            "Session closed ({} mounts, {} bytes in, {} bytes out)",
            self.stats.mounts,
            self.stats.bytes_in,
            self.tty.bytes_written()
        );
    }
}

impl<A: TerminalApp> Drop for Session<A> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Session registry: one session per live connection
pub struct SessionManager<A: TerminalApp> {
    app: Rc<A>,
    options: SessionOptions,
    sessions: HashMap<SessionId, Session<A>>,
    next_id: SessionId,
}

impl<A: TerminalApp> SessionManager<A> {
    pub fn new(app: A, options: SessionOptions) -> Self {
        Self {
            app: Rc::new(app),
            options,
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create a session for a newly opened connection
    pub fn open(&mut self, sink: OutputSink) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;

        let session = Session::new(id, Rc::clone(&self.app), sink, self.options);
        self.sessions.insert(id, session);
        info!(session = id, "Session opened ({} live)", self.sessions.len());
        id
    }

    /// Route an inbound message to its session
    pub fn dispatch(&mut self, id: SessionId, message: WireMessage) {
        match self.sessions.get_mut(&id) {
            Some(session) => session.handle_message(message),
            None => debug!(session = id, "message for unknown session"),
        }
    }

    /// Close and forget a session. Returns false if it was already gone.
    pub fn close(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session, e.g. on shutdown
    pub fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<&Session<A>> {
        self.sessions.get(&id)
    }

    /// Get session count
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Records the UI lifecycle instead of drawing anything
    #[derive(Default)]
    struct RecordingApp {
        events: Rc<RefCell<Vec<String>>>,
    }

    struct RecordingInstance {
        id: usize,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl TerminalApp for RecordingApp {
        type State = usize;
        type Instance = RecordingInstance;

        fn new_state(&self) -> usize {
            0
        }

        fn mount(&self, tty: PseudoTerminal, state: Rc<RefCell<usize>>) -> RecordingInstance {
            let mut mounted = state.borrow_mut();
            *mounted += 1;
            let mut input = Vec::new();
            while let Some(chunk) = tty.try_read() {
                input.extend_from_slice(&chunk);
            }
            self.events.borrow_mut().push(format!(
                "mount#{} {} input={:?}",
                *mounted,
                tty.dimensions(),
                String::from_utf8_lossy(&input)
            ));
            RecordingInstance {
                id: *mounted,
                events: Rc::clone(&self.events),
            }
        }
    }

    impl AppInstance for RecordingInstance {
        fn unmount(&mut self) {
            self.events.borrow_mut().push(format!("unmount#{}", self.id));
        }
    }

    fn session(options: SessionOptions) -> (Session<RecordingApp>, Rc<RefCell<Vec<String>>>, mpsc::UnboundedReceiver<Bytes>) {
        let app = RecordingApp::default();
        let events = Rc::clone(&app.events);
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(1, Rc::new(app), tx, options), events, rx)
    }

    fn resize(columns: u16, rows: u16) -> WireMessage {
        codec::encode_resize(Dimensions { columns, rows }, Framing::Sentinel)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Bytes> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_input_before_first_resize_is_buffered() {
        let (mut session, events, _rx) = session(SessionOptions::default());
        session.handle_message(WireMessage::Binary(b"a".to_vec()));
        session.handle_message(WireMessage::Text("b".to_string()));

        assert_eq!(session.state(), SessionState::Open);
        assert!(events.borrow().is_empty());
        assert_eq!(session.device().pending_input(), 2);

        session.handle_message(resize(80, 24));
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.dimensions(), Dimensions { columns: 80, rows: 24 });
        assert_eq!(*events.borrow(), vec![r#"mount#1 80x24 input="ab""#.to_string()]);
    }

    #[test]
    fn test_second_resize_clears_and_remounts_once() {
        let (mut session, events, mut rx) = session(SessionOptions::default());
        session.handle_message(resize(80, 24));
        assert!(drain(&mut rx).is_empty());

        session.handle_message(resize(100, 30));
        assert_eq!(drain(&mut rx), vec![Bytes::from_static(CLEAR_SCREEN)]);
        assert_eq!(session.dimensions(), Dimensions { columns: 100, rows: 30 });
        assert_eq!(
            *events.borrow(),
            vec![
                r#"mount#1 80x24 input="""#.to_string(),
                "unmount#1".to_string(),
                r#"mount#2 100x30 input="""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_remount_without_clear() {
        let options = SessionOptions {
            clear_on_remount: false,
            ..SessionOptions::default()
        };
        let (mut session, _events, mut rx) = session(options);
        session.handle_message(resize(80, 24));
        session.handle_message(resize(90, 24));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.stats().mounts, 2);
    }

    #[test]
    fn test_mount_and_unmount_accounting() {
        let (mut session, _events, _rx) = session(SessionOptions::default());
        for n in 1..=7u16 {
            session.handle_message(resize(40 + n, 10 + n));
        }
        assert_eq!(session.stats().mounts, 7);
        assert_eq!(session.stats().unmounts, 6);
        assert_eq!(session.stats().resizes, 7);

        session.close();
        assert_eq!(session.stats().unmounts, 7);
    }

    #[test]
    fn test_close_unmounts_exactly_once() {
        let (mut session, events, mut rx) = session(SessionOptions::default());
        session.handle_message(resize(80, 24));
        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.device().is_detached());
        let unmounts = events.borrow().iter().filter(|e| e.starts_with("unmount")).count();
        assert_eq!(unmounts, 1);

        // Nothing reaches a closed session
        session.handle_message(resize(100, 30));
        session.handle_message(WireMessage::Binary(b"late".to_vec()));
        assert_eq!(session.stats().mounts, 1);
        assert_eq!(session.device().pending_input(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_close_without_instance() {
        let (mut session, events, _rx) = session(SessionOptions::default());
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_malformed_frames_leave_state_unchanged() {
        let (mut session, events, _rx) = session(SessionOptions::default());
        session.handle_message(WireMessage::Binary(b"\xffabc".to_vec()));
        assert_eq!(session.state(), SessionState::Open);
        assert!(events.borrow().is_empty());

        session.handle_message(resize(80, 24));
        let before = events.borrow().len();
        for payload in [&b"\xff0,24"[..], b"\xff80", b"\xffx,y", b"\xff"] {
            session.handle_message(WireMessage::Binary(payload.to_vec()));
        }
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.dimensions(), Dimensions { columns: 80, rows: 24 });
        assert_eq!(events.borrow().len(), before);
        assert_eq!(session.stats().frames_dropped, 5);
        assert_eq!(session.device().pending_input(), 0);
    }

    #[test]
    fn test_mount_on_open_uses_placeholder() {
        let options = SessionOptions {
            mount_on_open: true,
            placeholder: Dimensions { columns: 120, rows: 40 },
            ..SessionOptions::default()
        };
        let (mut session, events, mut rx) = session(options);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(*events.borrow(), vec![r#"mount#1 120x40 input="""#.to_string()]);

        // The first real size is a remount in this mode
        session.handle_message(resize(80, 24));
        assert_eq!(drain(&mut rx), vec![Bytes::from_static(CLEAR_SCREEN)]);
        assert_eq!(session.stats().unmounts, 1);
    }

    #[test]
    fn test_ui_state_survives_remount() {
        let (mut session, _events, _rx) = session(SessionOptions::default());
        session.handle_message(resize(80, 24));
        session.handle_message(resize(81, 24));
        session.handle_message(resize(82, 24));
        assert_eq!(*session.ui_state().borrow(), 3);
    }

    #[test]
    fn test_json_framing() {
        let options = SessionOptions {
            framing: Framing::Json,
            ..SessionOptions::default()
        };
        let (mut session, _events, _rx) = session(options);
        session.handle_message(WireMessage::Text(r#"{"type":"resize","cols":70,"rows":20}"#.to_string()));
        session.handle_message(WireMessage::Text("hello".to_string()));
        assert_eq!(session.dimensions(), Dimensions { columns: 70, rows: 20 });
        assert_eq!(session.device().try_read(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn test_manager_isolates_sessions() {
        let app = RecordingApp::default();
        let events = Rc::clone(&app.events);
        let mut manager = SessionManager::new(app, SessionOptions::default());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = manager.open(tx_a);
        let b = manager.open(tx_b);
        assert_ne!(a, b);
        assert_eq!(manager.count(), 2);

        manager.dispatch(a, WireMessage::Binary(b"only-a".to_vec()));
        manager.dispatch(b, resize(50, 10));
        manager.dispatch(b, resize(60, 10));

        let session_a = manager.get(a).unwrap();
        assert_eq!(session_a.state(), SessionState::Open);
        assert_eq!(session_a.device().pending_input(), 1);
        assert!(drain(&mut rx_a).is_empty());

        let session_b = manager.get(b).unwrap();
        assert_eq!(session_b.dimensions(), Dimensions { columns: 60, rows: 10 });
        assert_eq!(drain(&mut rx_b), vec![Bytes::from_static(CLEAR_SCREEN)]);

        assert!(manager.close(b));
        assert!(!manager.close(b));
        assert_eq!(manager.count(), 1);
        manager.dispatch(b, resize(70, 10));
        assert_eq!(events.borrow().iter().filter(|e| e.starts_with("mount")).count(), 2);
        assert!(rx_b.try_recv().is_err());

        manager.close_all();
        assert_eq!(manager.count(), 0);
    }
}
