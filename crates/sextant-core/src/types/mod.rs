//! Core types for Sextant

mod authentication;
mod credential;
mod user;

pub use authentication::*;
pub use credential::*;
pub use user::*;
