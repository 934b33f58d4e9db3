pub mod classifier;
pub mod controller;
pub mod frame;
pub mod loop_worker;
pub mod source;
pub mod synthetic;

pub use classifier::{
    classify_validated, Classification, Classifier, ClassifierError, CommandClassifier,
    RawClassification,
};
pub use controller::SensingController;
pub use frame::Frame;
pub use loop_worker::SensingContext;
pub use source::{spawn_frame_pump, FrameSource, ImageDirSource, SourceEvent};
pub use synthetic::{DemoClassifier, SyntheticSource};
