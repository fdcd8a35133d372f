//! Real-time fan-out of balance, cashback and win events

pub mod auth;
pub mod events;
pub mod hub;
pub mod publisher;

pub use auth::{RedisSessionAuthenticator, SessionAuthenticator, StaticSessionAuthenticator};
pub use events::{EventEnvelope, LedgerEvent};
pub use hub::{FanoutHub, Registration};
pub use publisher::{run_redis_bridge, Publisher, RedisPublisher};
