//! Authentication and authorization steps.
//!
//! Both are ordinary pipeline steps: `authenticate_step` attaches a
//! [`Principal`](crate::request::Principal) to the request context and
//! `permission_step` halts the chain with `401`/`403` when it must.

pub mod authenticate;
pub mod permission;

pub use authenticate::{authenticate_step, bearer_token, Authenticate, AuthenticateStep};
pub use permission::{permission_step, Decision, PermissionCheck, PermissionStep};
