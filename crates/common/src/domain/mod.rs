mod dead_letter;
mod envelope;
mod processed_log;
mod result;

pub use dead_letter::*;
pub use envelope::*;
pub use processed_log::*;
pub use result::*;
