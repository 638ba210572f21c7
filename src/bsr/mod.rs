//! Bootstrap Record model, synthesis, and parsing.

pub mod model;
pub mod parse;
pub mod synth;

pub use model::BsrEntry;
pub use parse::parse as parse_bsr;
pub use synth::{synthesize, SynthesisReport, VolumeCatalog, VolumeRecord};
