//! Engine processors: the refund issuer, the reconciliation loop and the
//! webhook dispatcher.

pub mod reconciler;
pub mod refund_issuer;
pub mod webhook_dispatcher;

pub use reconciler::{CircuitState, CycleSummary, EngineStatus, Health, ReconEngine};
pub use refund_issuer::{RefundError, RefundIssuer, RefundOutcome, RefundSubmitter};
pub use webhook_dispatcher::{WebhookDispatcher, WebhookError};
