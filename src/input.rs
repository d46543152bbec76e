//! Event intake with a guard against terminal-resize floods.
//!
//! Resize events are swallowed here; geometry reconciliation runs through
//! the SIGWINCH self-pipe instead. Some terminals flood the input queue
//! with resize events during an interactive drag; after 128 consecutive
//! ones the whole queue is discarded and the read gives up.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event};

const RESIZE_FLOOD_LIMIT: u32 = 128;

/// Read the next non-resize event, waiting up to `timeout`. Returns `None`
/// when the wait elapses, when only resize events were pending, or when a
/// resize flood forced the input queue to be flushed.
pub fn read_event(timeout: Duration) -> io::Result<Option<Event>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    let mut resize_count = 0u32;
    loop {
        match event::read()? {
            Event::Resize(..) => {
                resize_count += 1;
                if resize_count > RESIZE_FLOOD_LIMIT {
                    tracing::warn!(
                        limit = RESIZE_FLOOD_LIMIT,
                        "resize event flood, discarding pending input"
                    );
                    while event::poll(Duration::ZERO)? {
                        let _ = event::read()?;
                    }
                    return Ok(None);
                }
                if !event::poll(Duration::ZERO)? {
                    return Ok(None);
                }
            }
            other => return Ok(Some(other)),
        }
    }
}
