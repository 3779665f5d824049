//! Attribute Protocol types shared by the GATT client ([Vol 3] Part F).

pub use handle::*;

mod handle;
