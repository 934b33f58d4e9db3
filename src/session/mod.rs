pub mod controller;
pub mod state;

pub use controller::{
    Admission, FinishReport, FrameOutcome, SampleTicket, SessionController, StatusReport,
    MAX_SESSION_DURATION,
};
pub use state::{EndReason, Session, SessionRequest};
