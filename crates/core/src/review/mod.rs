//! Consistency flags on stored recommendations and the admin review around them.

pub mod validator;
pub mod workflow;
