//! Recording side: raw page input in, ordered capture messages out.

pub mod channel;
pub mod error;
pub mod events;
pub mod machine;
pub mod scheduler;
pub mod session;
pub mod state;

pub use channel::{AckOutcome, ActionChannel};
pub use error::CaptureProtocolError;
pub use events::{
    CaptureMessage, ControllerResponse, ElementId, EventTarget, PageEvent, PageEventKind,
};
pub use machine::{CaptureEffect, EventCaptureStateMachine, Symbol};
pub use scheduler::{Scheduler, TimerPurpose};
pub use session::{CaptureSession, CaptureSessionHandle, SessionInput, SessionSummary};
pub use state::{CaptureState, MachineState};
