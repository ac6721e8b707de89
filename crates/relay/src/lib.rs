//! Agora relay
//!
//! Real-time delivery of chat messages over WebSockets. Each accepted
//! connection belongs to at most one conversation at a time; messages sent
//! into a conversation are persisted, then fanned out to every connection
//! registered for it. Participants of a direct conversation who have no
//! connection registered there receive a stored notification instead.

pub mod access;
pub mod claims;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;

pub use access::{authorize, can_access};
pub use claims::{Claims, TokenClaims, TokenVerifier};
pub use coordinator::{ChatSubmission, Coordinator, CoordinatorHandle, NewConnection};
pub use error::{RelayError, RelayResult};
pub use protocol::{ChatFrame, ClientFrame, DeliveredMessage, ServerFrame, GLOBAL_CONVERSATION};
pub use registry::{ConnectionId, Registry, RegistrySnapshot};
pub use routes::create_router;
pub use state::RelayState;
pub use store::{RelayStore, SqliteStore};
