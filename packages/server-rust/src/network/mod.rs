//! TCP server: secure envelope, session binding, listener lifecycle, and
//! shutdown control.

pub mod channel;
pub mod config;
pub mod module;
pub mod session;
pub mod shutdown;

pub use channel::{process_packet, ChannelError, Envelope, PacketHandler, SESSION_KEY_LEN};
pub use config::NetworkConfig;
pub use module::NetworkModule;
pub use session::{DbFactory, DbPacketHandler, SessionState};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
