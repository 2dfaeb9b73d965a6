pub mod jobs;
pub mod transcribe;

pub use jobs::*;
pub use transcribe::*;
