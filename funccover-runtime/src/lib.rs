//! Runtime support for sources rewritten by `funccover`.
//!
//! The instrumenter appends a module to the crate root that owns one
//! [`Cover`] static. Every instrumented function marks its own slot with
//! [`Cover::hit`], and `main` holds a [`Flush`] guard that writes the
//! coverage file when it returns.

#![forbid(unsafe_code)]

mod cover;

pub use cover::{Cover, Flush};
