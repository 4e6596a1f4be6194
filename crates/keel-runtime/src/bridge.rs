//! Trap/exception bridge.
//!
//! Tracks the call chain of one store as a stack of frames and owns the
//! single pending-failure slot.  The chain moves through four states:
//!
//! ```text
//!   Idle ──invoke──▶ InGuestCall ──import──▶ InHostCallback
//!                       ▲    │                  │     │
//!                       │    └──── return ◀─────┘     │ failure
//!                       │                             ▼
//!                     Idle ◀──── guest unwound ──── Trapping
//! ```
//!
//! A host failure is recorded once, at the innermost point it happens.  The
//! engine then unwinds the guest; when control returns past the nearest
//! guest entry the record is taken out of the slot and handed to whoever made
//! that call.  If that caller is itself a host callback that propagates the
//! failure unchanged, the same record is put back and travels outwards, so the
//! top-level invocation sees the original message.

use std::sync::Arc;

use serde::Serialize;
use tracing::{trace, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::trap::{Frame, FrameKind, TrapOrigin, TrapRecord};

/// Observable state of a store's call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call in flight.
    Idle,
    /// Guest code is running.
    InGuestCall,
    /// A host callback invoked by the guest is running.
    InHostCallback,
    /// A failure has been captured and the guest is unwinding.
    Trapping,
}

pub(crate) struct Bridge {
    frames: Vec<Frame>,
    pending: Option<TrapRecord>,
    guest_depth: u32,
    max_call_depth: u32,
    capture_frames: bool,
}

impl Bridge {
    pub(crate) fn new(config: &RuntimeConfig) -> Self {
        Self {
            frames: Vec::new(),
            pending: None,
            guest_depth: 0,
            max_call_depth: config.max_call_depth,
            capture_frames: config.capture_frames,
        }
    }

    pub(crate) fn state(&self) -> CallState {
        if self.pending.is_some() {
            return CallState::Trapping;
        }
        match self.frames.last() {
            None => CallState::Idle,
            Some(frame) if frame.kind == FrameKind::Guest => CallState::InGuestCall,
            Some(_) => CallState::InHostCallback,
        }
    }

    /// Current frame depth, used to restore the chain after a caught panic.
    pub(crate) fn mark(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn enter_guest(&mut self, name: Arc<str>) -> Result<()> {
        if let Some(record) = &self.pending {
            return Err(Error::Trap(record.clone()));
        }
        if self.guest_depth >= self.max_call_depth {
            return Err(Error::CallDepthExceeded(self.max_call_depth));
        }
        trace!(target: "keel::bridge", export = %name, depth = self.guest_depth + 1, "enter guest");
        self.guest_depth += 1;
        self.frames.push(Frame::guest(name));
        Ok(())
    }

    pub(crate) fn leave_guest(&mut self) {
        self.pop(FrameKind::Guest);
        self.guest_depth = self.guest_depth.saturating_sub(1);
        trace!(target: "keel::bridge", depth = self.guest_depth, "leave guest");
    }

    /// Leave a guest call that the engine reported as failed.
    ///
    /// Takes the pending record if a host callback put one there; otherwise
    /// the engine itself trapped and a guest-origin record is built from its
    /// message.  Either way the slot is empty afterwards.
    pub(crate) fn leave_guest_failed(&mut self, engine_error: wasmi::Error) -> Error {
        let record = match self.pending.take() {
            Some(record) => record,
            None => {
                let record =
                    TrapRecord::new(engine_error.to_string(), TrapOrigin::Guest, self.snapshot());
                warn!(target: "keel::bridge", message = record.message(), "guest trapped");
                record
            }
        };
        self.leave_guest();
        Error::Trap(record)
    }

    pub(crate) fn enter_host(&mut self, name: Arc<str>) {
        trace!(target: "keel::bridge", callback = %name, "enter host");
        self.frames.push(Frame::host(name));
    }

    pub(crate) fn leave_host(&mut self) {
        self.pop(FrameKind::Host);
        trace!(target: "keel::bridge", "leave host");
    }

    /// Capture a host callback failure.
    ///
    /// A failure that already is a trap keeps its record untouched; anything
    /// else becomes a new record at the current frame.  Only the first record
    /// of an unwind is kept.  Returns the message to hand to the engine.
    pub(crate) fn fail_host(&mut self, error: Error) -> String {
        let record = match error {
            Error::Trap(record) => record,
            other => {
                let origin = match other {
                    Error::HostPanic(_) => TrapOrigin::HostPanic,
                    _ => TrapOrigin::HostCallback,
                };
                TrapRecord::new(other.trap_message(), origin, self.snapshot())
            }
        };
        let message = record.message().to_string();
        match &self.pending {
            Some(existing) => {
                trace!(
                    target: "keel::bridge",
                    kept = existing.message(),
                    dropped = %message,
                    "failure already pending"
                );
            }
            None => {
                warn!(
                    target: "keel::bridge",
                    message = %message,
                    origin = ?record.origin(),
                    "host callback failed; trapping"
                );
                self.pending = Some(record);
            }
        }
        message
    }

    /// Take the pending record when no guest frame is left to unwind.
    pub(crate) fn take_pending(&mut self) -> Option<TrapRecord> {
        self.pending.take()
    }

    /// Drop frames pushed after `mark`.
    pub(crate) fn unwind_to(&mut self, mark: usize) {
        while self.frames.len() > mark {
            if let Some(frame) = self.frames.pop() {
                if frame.kind == FrameKind::Guest {
                    self.guest_depth = self.guest_depth.saturating_sub(1);
                }
            }
        }
    }

    fn pop(&mut self, kind: FrameKind) {
        if self.frames.last().map(|frame| frame.kind) == Some(kind) {
            self.frames.pop();
        }
    }

    fn snapshot(&self) -> Vec<Frame> {
        if self.capture_frames {
            self.frames.clone()
        } else {
            Vec::new()
        }
    }
}
