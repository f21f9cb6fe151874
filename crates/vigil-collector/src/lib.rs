//! Value production for monitor items: a one-shot system prober, the static
//! built-in key catalog, user-mapped external commands, and the dispatcher
//! that picks between them.

pub mod builtin;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod snapshot;
