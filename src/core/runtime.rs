//! Contract between the bridge and the hosted terminal UI.
//!
//! A session mounts one UI instance at a time on its [`PseudoTerminal`].
//! The instance reads keystrokes only from the device's input queue and
//! writes output only through the device. It computes its layout from the
//! device dimensions at mount time; a resize is handled by the session
//! unmounting it and mounting a fresh one.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use tokio::task::JoinHandle;

use super::device::PseudoTerminal;

/// A terminal UI that can be mounted on a pseudo terminal
pub trait TerminalApp {
    /// State owned by one session and handed to every instance mounted in
    /// it, so it survives remounts but is never shared between sessions.
    type State;
    type Instance: AppInstance;

    /// Fresh state for a new session
    fn new_state(&self) -> Self::State;

    /// Bind a new UI instance to `tty`
    fn mount(&self, tty: PseudoTerminal, state: Rc<RefCell<Self::State>>) -> Self::Instance;
}

/// A mounted UI instance
pub trait AppInstance {
    /// Release everything the instance registered against its device.
    /// After this returns the instance must not write again.
    fn unmount(&mut self);
}

/// An instance driven by a task on the current `LocalSet`.
///
/// Unmounting aborts the task; since everything is single-threaded the task
/// is never polled again, so no output can follow the unmount.
#[derive(Debug)]
pub struct LocalTask {
    handle: Option<JoinHandle<()>>,
}

impl LocalTask {
    /// Spawn `future` on the current `LocalSet`
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            handle: Some(tokio::task::spawn_local(future)),
        }
    }

    #[allow(dead_code)]
    pub fn is_mounted(&self) -> bool {
        self.handle.is_some()
    }
}

impl AppInstance for LocalTask {
    fn unmount(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for LocalTask {
    fn drop(&mut self) {
        self.unmount();
    }
}
