//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter — reject early, save resources
//! 2. Auth validator — resolves the bearer token to a user id
//! 3. Access log — logs after auth, has user_id

pub mod audit;
pub mod auth;
pub mod rate;
