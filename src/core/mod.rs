//! 核心编排层：配对缓冲、事件分发、错误恢复、交换编排、关闭信号

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod pairing;
pub mod recovery;
pub mod shutdown;

pub use dispatcher::{Dispatch, Dispatcher, Route};
pub use error::{ExchangeError, RecoveryAction};
pub use orchestrator::{ExchangeOrchestrator, ExchangeOutcome, ExchangeSettings};
pub use pairing::{CompletedPair, PairingBuffer};
pub use recovery::{ErrorClass, RecoveryController, RecoveryState, RetryPolicy};
pub use shutdown::{ShutdownManager, ShutdownReason};
