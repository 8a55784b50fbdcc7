//! # bgpd-injector
//!
//! Keeps BGP-4 sessions up with a set of configured peers and lets HTTP
//! clients queue UPDATE messages onto them.
//!
//! ```sh
//! $ curl -u admin:admin -X POST http://localhost:8801/v1/peer/10.0.0.1/send/update \
//!     -d '{"nlri": "10.1.0.0/24", "next_hop": "10.0.0.2", "as_path": [65001]}'
//! {"status":"queued","peer":"10.0.0.1","message_id":"8c0d..."}
//! ```
pub mod api;
pub mod config;
pub mod injector;
pub mod message;
pub mod registry;
pub mod session;
pub mod utils;

pub use config::ServerConfig;
