//! # cbfs-client
//!
//! Client side of the callback file store: a [`Session`] holding one
//! registered connection to `cbfsd`, and the [`ClientCache`] that server
//! notices keep honest.

pub mod cache;
pub mod error;
pub mod session;

pub use cache::{CacheState, ClientCache};
pub use error::{ClientError, Result};
pub use session::Session;
