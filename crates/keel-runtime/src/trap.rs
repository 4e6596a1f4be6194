//! Trap records: the host-visible form of a failed call chain.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// What kind of code a call-chain frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Guest,
    Host,
}

/// One active frame of a call chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub name: Arc<str>,
}

impl Frame {
    pub fn guest(name: Arc<str>) -> Self {
        Self {
            kind: FrameKind::Guest,
            name,
        }
    }

    pub fn host(name: Arc<str>) -> Self {
        Self {
            kind: FrameKind::Host,
            name,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FrameKind::Guest => write!(f, "guest:{}", self.name),
            FrameKind::Host => write!(f, "host:{}", self.name),
        }
    }
}

/// Where a trap originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapOrigin {
    /// A host callback returned an error.
    HostCallback,
    /// A host callback panicked.
    HostPanic,
    /// The engine trapped while running guest code.
    Guest,
}

/// A captured call-chain failure.
///
/// Created when the failure happens, carried by the store's bridge while the
/// guest unwinds, and handed to the caller of the outermost affected
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrapRecord {
    message: String,
    origin: TrapOrigin,
    frames: Vec<Frame>,
}

impl TrapRecord {
    pub(crate) fn new(message: String, origin: TrapOrigin, frames: Vec<Frame>) -> Self {
        Self {
            message,
            origin,
            frames,
        }
    }

    /// The original failure message, verbatim.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> TrapOrigin {
        self.origin
    }

    /// Frames active at the failure point, outermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Render the frames innermost first, one per line.
    pub fn backtrace(&self) -> String {
        self.frames
            .iter()
            .rev()
            .enumerate()
            .map(|(depth, frame)| format!("  {depth}: {frame}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for TrapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wasm trap: {}", self.message)
    }
}
