//! Device-side IoT hub client
//!
//! - [`client`] - the [`IotHubClient`] lifecycle: init, connect, poll
//! - [`session`] - publishing operations shared with observers
//! - [`dispatcher`] - inbound routing to the observer slots
//! - [`twin`] - request ids and the outstanding-GET flag
//! - [`clock`] - token expiry time source

pub mod client;
pub mod clock;
pub mod dispatcher;
pub mod session;
pub mod twin;

pub use client::{IotHubClient, SessionState};
pub use clock::{compute_expiry, Clock, SystemClock};
pub use dispatcher::{C2dMessage, DesiredPatch, Dispatch, Dispatcher, Observers};
pub use session::HubSession;
pub use twin::TwinCoordinator;
