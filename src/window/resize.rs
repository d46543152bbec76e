//! SIGWINCH handling via a self-pipe.
//!
//! The handler is restricted to async-signal-safe work: a flag check, a
//! single-byte write to the pipe, and chaining to whatever handler was
//! installed before us. Everything else happens on the loop thread when the
//! read end becomes readable.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::error::{Error, Result};

static INSTALL_COUNT: Mutex<usize> = Mutex::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);
static PIPE_SIGNALED: AtomicBool = AtomicBool::new(false);
static PIPE_READ_FD: AtomicI32 = AtomicI32::new(-1);
static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static PREV_HANDLER: AtomicUsize = AtomicUsize::new(0);
static SAVED_ACTION: Mutex<Option<libc::sigaction>> = Mutex::new(None);

extern "C" fn sigwinch_handler(signal: libc::c_int) {
    // The signal can arrive between any two instructions; only poke the
    // pipe, and only once per drain.
    if !INSTALLED.load(Ordering::SeqCst) {
        return;
    }
    if !PIPE_SIGNALED.swap(true, Ordering::SeqCst) {
        let byte = 0u8;
        unsafe {
            libc::write(
                PIPE_WRITE_FD.load(Ordering::SeqCst),
                (&raw const byte).cast(),
                1,
            );
        }
    }
    let prev = PREV_HANDLER.load(Ordering::SeqCst);
    if prev != libc::SIG_DFL && prev != libc::SIG_IGN {
        let prev: extern "C" fn(libc::c_int) = unsafe { mem::transmute(prev) };
        prev(signal);
    }
}

/// Install the handler and the pipe, once per process; nested installs are
/// reference-counted so concurrent managers do not tear each other down.
/// Returns the read end for the message loop to watch.
pub(crate) fn install() -> Result<RawFd> {
    let mut count = INSTALL_COUNT.lock().unwrap_or_else(|err| err.into_inner());
    if *count > 0 {
        *count += 1;
        return Ok(PIPE_READ_FD.load(Ordering::SeqCst));
    }

    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(Error::SignalInstall(io::Error::last_os_error()));
    }
    PIPE_SIGNALED.store(false, Ordering::SeqCst);
    PIPE_READ_FD.store(fds[0], Ordering::SeqCst);
    PIPE_WRITE_FD.store(fds[1], Ordering::SeqCst);

    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    let handler: extern "C" fn(libc::c_int) = sigwinch_handler;
    action.sa_sigaction = handler as usize;
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    action.sa_flags = 0;

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(libc::SIGWINCH, &action, &mut previous) } == -1 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        PIPE_READ_FD.store(-1, Ordering::SeqCst);
        PIPE_WRITE_FD.store(-1, Ordering::SeqCst);
        return Err(Error::SignalInstall(err));
    }

    // Chain only plain handlers; SA_SIGINFO handlers take a different
    // signature and cannot be called from here.
    let chained = if previous.sa_flags & libc::SA_SIGINFO == 0 {
        previous.sa_sigaction
    } else {
        libc::SIG_DFL
    };
    PREV_HANDLER.store(chained, Ordering::SeqCst);
    *SAVED_ACTION.lock().unwrap_or_else(|err| err.into_inner()) = Some(previous);

    INSTALLED.store(true, Ordering::SeqCst);
    *count = 1;
    Ok(fds[0])
}

/// Restore the saved disposition and close the pipe when the last manager
/// lets go.
pub(crate) fn uninstall() {
    let mut count = INSTALL_COUNT.lock().unwrap_or_else(|err| err.into_inner());
    match *count {
        0 => return,
        1 => {}
        _ => {
            *count -= 1;
            return;
        }
    }
    *count = 0;

    INSTALLED.store(false, Ordering::SeqCst);
    if let Some(previous) = SAVED_ACTION
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .take()
    {
        unsafe { libc::sigaction(libc::SIGWINCH, &previous, std::ptr::null_mut()) };
    }
    let read_fd = PIPE_READ_FD.swap(-1, Ordering::SeqCst);
    let write_fd = PIPE_WRITE_FD.swap(-1, Ordering::SeqCst);
    unsafe {
        if read_fd >= 0 {
            libc::close(read_fd);
        }
        if write_fd >= 0 {
            libc::close(write_fd);
        }
    }
    PIPE_SIGNALED.store(false, Ordering::SeqCst);
}

/// Reset the pipe if the handler poked it. One byte is drained no matter
/// how many signals were delivered since the last drain.
pub(crate) fn drain() {
    if INSTALLED.load(Ordering::SeqCst) && PIPE_SIGNALED.swap(false, Ordering::SeqCst) {
        let mut byte = 0u8;
        unsafe {
            libc::read(
                PIPE_READ_FD.load(Ordering::SeqCst),
                (&raw mut byte).cast(),
                1,
            );
        }
    }
}

#[cfg(test)]
pub(crate) fn signaled() -> bool {
    PIPE_SIGNALED.load(Ordering::SeqCst)
}
