//! FedReconcile Core Types
//!
//! This crate provides the types shared by every FedReconcile component:
//! - Session claims and roles
//! - Bearer credential codec (HMAC-SHA256)
//! - Identity store abstraction used by the login endpoint
//! - Client-side session object
//! - Core error types

pub mod claims;
pub mod error;
pub mod identity;
pub mod session;
pub mod token;

pub use claims::{Principal, Role, SessionClaims};
pub use error::{Error, Result};
pub use identity::{Identity, IdentityStore, StaticIdentityStore, UserRecord};
pub use session::ClientSession;
pub use token::{TokenCodec, TokenError};
