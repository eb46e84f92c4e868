//! Transfer execution backends
//!
//! - [`conway`]: platform credit transfers
//! - [`vultisig`]: out-of-process wallet signing
//! - [`dispatcher`]: routes approved intents and records the outcome

pub mod conway;
pub mod dispatcher;
pub mod vultisig;

pub use conway::{ConwayClient, CreditTransfer, CreditTransferApi};
pub use dispatcher::{ExecutionBackend, TransferExecutor};
pub use vultisig::{BrokerStatus, BrokerSubmission, BrokerTransport, VultisigBroker};
