//! Sequential Bluetooth LE central-role client core.
//!
//! The crate decodes advertising data, runs scan sessions, connects to
//! peripherals, and binds discovered GATT services to statically registered
//! [`gatt::ServiceDescriptor`]s. The radio and transport are provided by a
//! [`host::Adapter`] implementation.

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::empty_drop)]
#![warn(clippy::exit)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::print_stdout)]
#![warn(clippy::rc_mutex)]
#![warn(clippy::str_to_string)]
#![warn(clippy::todo)]
#![warn(clippy::try_err)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub use client::*;

use crate::att::Handle;
use crate::gap::Uuid;
use crate::host::Status;
use crate::le::{Addr, ConnHandle};

pub mod att;
mod client;
pub mod config;
pub mod dev;
pub mod gap;
pub mod gatt;
pub mod host;
pub mod le;
pub mod scan;
mod util;

/// Error type returned by the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Host(#[from] host::Error),
    #[error("service {0} is already registered")]
    DuplicateService(Uuid),
    #[error("connection to {addr:?} failed ({status})")]
    Connect { addr: Addr, status: Status },
    #[error("discovery failed on {hdl} ({status})")]
    DiscoveryFailed { hdl: ConnHandle, status: Status },
    #[error("{val} on {hdl} is stale")]
    StaleHandle { hdl: ConnHandle, val: Handle },
    #[error("adapter closed the event queue")]
    Closed,
}

/// Common client result type.
pub type Result<T> = std::result::Result<T, Error>;
