pub mod cache;
pub mod flow;
pub mod retake;
pub mod retry;

pub use flow::{Family, Phase, Session};
pub use retake::{RetakeOptions, RetakeOrchestrator, RetakeOutcome, RetakeState, Step};
pub use retry::RetryPolicy;
