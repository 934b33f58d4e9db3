pub mod emotion;
pub mod reading;
pub mod session;

pub use emotion::{Emotion, EmotionScores, UnknownEmotion};
pub use reading::Reading;
pub use session::{SessionRecord, SessionStatus};
