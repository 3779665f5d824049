//! Generic Attribute Profile client ([Vol 3] Part G).

pub use {binding::*, consts::*, discovery::*, registry::*};

mod binding;
mod consts;
mod discovery;
mod registry;
