//! The cooperative message loop the window manager hangs off.
//!
//! The loop multiplexes file descriptors with `poll(2)` and delivers a
//! [`LoopEvent::Readable`] to the idle hook whenever someone armed the
//! readable flag since the last pass. Tree mutations arm the flag; the idle
//! hook runs the paint scheduler. Watch callbacks and the idle hook are free
//! to re-enter the loop handle.

use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Readable,
}

pub type IdleHook = Rc<dyn Fn(LoopEvent)>;
pub type WatchCallback = Rc<dyn Fn()>;

struct LoopState {
    idle_hook: RefCell<Option<IdleHook>>,
    readable: Cell<bool>,
    watches: RefCell<Vec<(RawFd, WatchCallback)>>,
}

/// Cheaply clonable handle; all clones share one loop.
#[derive(Clone)]
pub struct MessageLoop {
    state: Rc<LoopState>,
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLoop {
    pub fn new() -> Self {
        Self {
            state: Rc::new(LoopState {
                idle_hook: RefCell::new(None),
                readable: Cell::new(false),
                watches: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Drop the hook and all watches. Safe to call more than once.
    pub fn shutdown(&self) {
        self.state.idle_hook.borrow_mut().take();
        self.state.watches.borrow_mut().clear();
        self.state.readable.set(false);
    }

    pub fn set_idle_hook(&self, hook: IdleHook) {
        *self.state.idle_hook.borrow_mut() = Some(hook);
    }

    pub fn clear_idle_hook(&self) {
        self.state.idle_hook.borrow_mut().take();
    }

    /// Arm delivery of [`LoopEvent::Readable`] on the next pump pass.
    /// Multiple arms before a pass coalesce into one delivery.
    pub fn signal_readable(&self) {
        self.state.readable.set(true);
    }

    pub fn readable_armed(&self) -> bool {
        self.state.readable.get()
    }

    pub fn add_watch(&self, fd: RawFd, callback: WatchCallback) {
        self.state.watches.borrow_mut().push((fd, callback));
    }

    pub fn remove_watch(&self, fd: RawFd) {
        self.state
            .watches
            .borrow_mut()
            .retain(|(watched, _)| *watched != fd);
    }

    /// One pass: wait up to `timeout` for a watched descriptor, run the
    /// callbacks of every readable one, then dispatch the idle hook if the
    /// readable flag is armed. Returns whether anything was dispatched.
    pub fn pump(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds: Vec<libc::pollfd> = self
            .state
            .watches
            .borrow()
            .iter()
            .map(|&(fd, _)| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // An armed readable flag means there is pending idle work; do not
        // sleep the full timeout in front of it.
        let timeout_ms = if self.state.readable.get() {
            0
        } else {
            timeout.as_millis().min(i32::MAX as u128) as i32
        };

        if !fds.is_empty() {
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        } else if timeout_ms > 0 {
            std::thread::sleep(Duration::from_millis(timeout_ms as u64));
        }

        let mut dispatched = false;

        // Collect ready callbacks first so the watch list is not borrowed
        // while they run.
        let ready: Vec<WatchCallback> = {
            let watches = self.state.watches.borrow();
            fds.iter()
                .filter(|pollfd| pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0)
                .filter_map(|pollfd| {
                    watches
                        .iter()
                        .find(|(fd, _)| *fd == pollfd.fd)
                        .map(|(_, cb)| Rc::clone(cb))
                })
                .collect()
        };
        for callback in ready {
            callback();
            dispatched = true;
        }

        if self.state.readable.take() {
            let hook = self.state.idle_hook.borrow().clone();
            if let Some(hook) = hook {
                hook(LoopEvent::Readable);
                dispatched = true;
            }
        }

        Ok(dispatched)
    }
}
