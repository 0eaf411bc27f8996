//! Pedicab Client - driver-side engine for the pedicab dispatch backend
//!
//! Session handling, online presence, order sync, order acceptance and
//! earnings on top of the dispatch HTTP API. [`DriverClient`] wires the
//! engines together; each engine can also be used on its own.

pub mod acceptance;
pub mod config;
pub mod driver;
pub mod earnings;
pub mod error;
pub mod http;
pub mod logger;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orders;
pub mod presence;
pub mod session;
pub mod tasks;
pub mod withdrawals;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use http::{DispatchApi, NetworkHttpClient};

pub use acceptance::{AcceptOutcome, AcceptTicket, AcceptanceCoordinator, ClaimState};
pub use driver::{DriverClient, DriverSnapshot};
pub use earnings::EarningsAggregator;
pub use orders::{OrderPartition, OrderSnapshot, OrderSource, OrderSyncEngine, RefreshReport};
pub use presence::{FixedLocationProvider, LocationProvider, PresenceManager, PresenceSnapshot};
pub use session::{Credentials, Session, SessionEvent, SessionScope, SessionStore};
pub use tasks::SessionTasks;
pub use withdrawals::{WithdrawalRequest, WithdrawalService};

// Re-export shared types for convenience
pub use shared::models::{
    DriverPresence, EarningsSnapshot, GeoPoint, Order, OrderStatus, Role, UserInfo, Withdrawal,
    WithdrawalStatus,
};
