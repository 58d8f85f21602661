//! Application services: descriptor store, connection pool, deadlines,
//! dispatch and registry operations.

mod dispatcher;
mod error;
mod governor;
mod pool;
mod registry;
mod store;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use governor::{GovernorError, InvocationDeadlines};
pub use pool::{
    AcquireError, CallGate, CallPermit, ConnectionPool, GateError, Lease, PoolSettings,
};
pub use registry::{ServerStatus, ToolRegistryService};
pub use store::{DescriptorStore, DescriptorStoreError, DescriptorStoreResult};
