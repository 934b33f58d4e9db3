mod types;

pub use types::SamplingStats;
