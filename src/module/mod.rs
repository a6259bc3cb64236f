pub mod config;
pub mod file;
pub mod result;

pub use config::{GroupDescriptor, ModuleConfig, Section};
pub use file::{ModuleFile, ModuleGroup};
pub use result::{
    Answer, FirstAttemptResult, GroupResponse, GroupResult, ItemOutcome, ResponsePayload,
    RetakeAnswer, RetakeAnswerRecord,
};
