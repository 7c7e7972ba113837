//! Pseudo terminal device
//!
//! A software-only terminal endpoint. The hosted UI reads keystrokes from its
//! input queue and writes screen output through it, exactly as it would with
//! a real TTY, while the bytes actually travel over the session's WebSocket.
//!
//! ```text
//! browser --push()--> [input queue] --read()--> UI instance
//! browser <--sink---- write_bytes() <---------- UI instance
//! ```
//!
//! The device is a cheap `Rc` handle: the session keeps one clone, each
//! mounted UI instance gets another. It is not `Send`; everything runs on
//! the server's single-threaded `LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use super::codec::Dimensions;

/// Outbound half of a connection, drained by the transport task
pub type OutputSink = mpsc::UnboundedSender<Bytes>;

struct DeviceInner {
    dimensions: Cell<Dimensions>,
    input: RefCell<VecDeque<Bytes>>,
    readable: Notify,
    sink: RefCell<Option<OutputSink>>,
    raw_mode: Cell<bool>,
    loop_refs: Cell<bool>,
    bytes_written: Cell<u64>,
}

/// Handle to a pseudo terminal
#[derive(Clone)]
pub struct PseudoTerminal {
    inner: Rc<DeviceInner>,
}

impl PseudoTerminal {
    /// Create a device forwarding output to `sink`, reporting `dimensions`
    /// until the first real size is known.
    pub fn new(sink: OutputSink, dimensions: Dimensions) -> Self {
        Self {
            inner: Rc::new(DeviceInner {
                dimensions: Cell::new(dimensions),
                input: RefCell::new(VecDeque::new()),
                readable: Notify::new(),
                sink: RefCell::new(Some(sink)),
                raw_mode: Cell::new(false),
                loop_refs: Cell::new(true),
                bytes_written: Cell::new(0),
            }),
        }
    }

    /// Always true: the UI must enable its terminal behaviours
    pub fn is_terminal(&self) -> bool {
        true
    }

    pub fn dimensions(&self) -> Dimensions {
        self.inner.dimensions.get()
    }

    pub fn columns(&self) -> u16 {
        self.inner.dimensions.get().columns
    }

    pub fn rows(&self) -> u16 {
        self.inner.dimensions.get().rows
    }

    /// Update the size reported to the next UI instance mounted on this
    /// device. Running instances are not notified.
    pub fn set_dimensions(&self, dimensions: Dimensions) {
        self.inner.dimensions.set(dimensions);
    }

    /// Forward output bytes to the connection.
    ///
    /// Never blocks and never fails: output to a closed connection is
    /// discarded.
    pub fn write_bytes(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let sink = self.inner.sink.borrow();
        let Some(sink) = sink.as_ref() else {
            tracing::trace!("device detached, discarding {} output bytes", bytes.len());
            return;
        };
        if sink.send(Bytes::copy_from_slice(bytes)).is_err() {
            tracing::debug!("connection gone, discarding {} output bytes", bytes.len());
            return;
        }
        let written = self.inner.bytes_written.get();
        self.inner.bytes_written.set(written + bytes.len() as u64);
    }

    /// Queue input bytes for the UI
    pub fn push(&self, bytes: Bytes) {
        if bytes.is_empty() || self.is_detached() {
            return;
        }
        self.inner.input.borrow_mut().push_back(bytes);
        self.inner.readable.notify_one();
    }

    /// Take the oldest queued input chunk, if any
    pub fn try_read(&self) -> Option<Bytes> {
        self.inner.input.borrow_mut().pop_front()
    }

    /// Wait for the next input chunk.
    ///
    /// Returns `None` once the device is detached and its queue is drained.
    pub async fn read(&self) -> Option<Bytes> {
        loop {
            if let Some(chunk) = self.try_read() {
                return Some(chunk);
            }
            if self.is_detached() {
                return None;
            }
            self.inner.readable.notified().await;
        }
    }

    /// Number of chunks waiting to be read
    pub fn pending_input(&self) -> usize {
        self.inner.input.borrow().len()
    }

    /// Disconnect from the connection. Idempotent.
    pub fn detach(&self) {
        if self.inner.sink.borrow_mut().take().is_some() {
            self.inner.readable.notify_one();
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.sink.borrow().is_none()
    }

    /// Accepted for compatibility with terminal setup; there is no line
    /// discipline to switch.
    pub fn set_raw_mode(&self, enabled: bool) {
        self.inner.raw_mode.set(enabled);
    }

    pub fn is_raw_mode(&self) -> bool {
        self.inner.raw_mode.get()
    }

    /// No-op: there is no process event loop to keep alive
    pub fn ref_loop(&self) {
        self.inner.loop_refs.set(true);
    }

    /// No-op counterpart of [`PseudoTerminal::ref_loop`]
    pub fn unref_loop(&self) {
        self.inner.loop_refs.set(false);
    }

    /// Total bytes handed to the connection
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.get()
    }
}

impl std::fmt::Debug for PseudoTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoTerminal")
            .field("dimensions", &self.dimensions())
            .field("pending_input", &self.pending_input())
            .field("detached", &self.is_detached())
            .field("raw_mode", &self.is_raw_mode())
            .field("referenced", &self.inner.loop_refs.get())
            .finish()
    }
}

/// Lets UI code render with `crossterm::queue!` through a `BufWriter`.
/// Each `write` call becomes one outbound chunk.
impl io::Write for PseudoTerminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn device() -> (PseudoTerminal, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PseudoTerminal::new(tx, Dimensions::default()), rx)
    }

    #[test]
    fn test_capabilities() {
        let (tty, _rx) = device();
        assert!(tty.is_terminal());
        assert_eq!((tty.columns(), tty.rows()), (80, 24));

        tty.set_dimensions(Dimensions { columns: 100, rows: 30 });
        assert_eq!(tty.dimensions(), Dimensions { columns: 100, rows: 30 });

        tty.set_raw_mode(true);
        assert!(tty.is_raw_mode());
        tty.unref_loop();
        tty.ref_loop();
    }

    #[test]
    fn test_write_preserves_order() {
        let (tty, mut rx) = device();
        tty.write_bytes(b"one");
        tty.write_bytes(b"");
        let mut handle = tty.clone();
        handle.write_all(b"two").unwrap();
        tty.write_bytes(b"three");

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"three"));
        assert!(rx.try_recv().is_err());
        assert_eq!(tty.bytes_written(), 11);
    }

    #[test]
    fn test_stale_writes_are_discarded() {
        let (tty, rx) = device();
        drop(rx);
        tty.write_bytes(b"lost");
        assert_eq!(tty.bytes_written(), 0);

        let (tty, mut rx) = device();
        tty.detach();
        tty.detach();
        tty.write_bytes(b"lost");
        assert!(tty.is_detached());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_input_is_fifo() {
        let (tty, _rx) = device();
        let chunks: Vec<Bytes> = (0..50).map(|i| Bytes::from(format!("chunk{i}"))).collect();
        for chunk in &chunks {
            tty.push(chunk.clone());
        }
        tty.push(Bytes::new());
        assert_eq!(tty.pending_input(), 50);

        let read: Vec<Bytes> = std::iter::from_fn(|| tty.try_read()).collect();
        assert_eq!(read, chunks);
    }

    #[tokio::test]
    async fn test_read_waits_for_push() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tty, _rx) = device();
                let reader = tty.clone();
                let task = tokio::task::spawn_local(async move {
                    let mut seen = Vec::new();
                    while let Some(chunk) = reader.read().await {
                        seen.extend_from_slice(&chunk);
                    }
                    seen
                });

                tokio::task::yield_now().await;
                tty.push(Bytes::from_static(b"a"));
                tty.push(Bytes::from_static(b"b"));
                tokio::task::yield_now().await;
                tty.push(Bytes::from_static(b"c"));
                tty.detach();

                assert_eq!(task.await.unwrap(), b"abc".to_vec());
            })
            .await;
    }

    #[tokio::test]
    async fn test_read_after_detach_drains_then_ends() {
        let (tty, _rx) = device();
        tty.push(Bytes::from_static(b"x"));
        tty.detach();
        tty.push(Bytes::from_static(b"y"));
        assert_eq!(tty.read().await, Some(Bytes::from_static(b"x")));
        assert_eq!(tty.read().await, None);
    }
}
