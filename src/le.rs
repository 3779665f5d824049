//! LE-specific types.

use std::fmt::{Debug, Display, Formatter};

use crate::util::name_of;

/// Bluetooth device address ([Vol 6] Part B, Section 1.3).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, strum::Display)]
pub enum Addr {
    Public(RawAddr),
    Random(RawAddr),
}

impl Addr {
    /// Constructs a peer address from the raw address type reported by the
    /// controller ([Vol 4] Part E, Section 7.7.65.2). Returns [`None`] for an
    /// unknown address type.
    #[inline]
    #[must_use]
    pub fn peer(typ: u8, raw: impl Into<RawAddr>) -> Option<Self> {
        match typ {
            // Public Device Address or Public Identity Address
            0x00 | 0x02 => Some(Self::Public(raw.into())),
            // Random Device Address or Random (Static) Identity Address
            0x01 | 0x03 => Some(Self::Random(raw.into())),
            _ => None,
        }
    }

    /// Returns the raw address type (0x00 for public, 0x01 for random).
    #[inline]
    #[must_use]
    pub const fn typ(self) -> u8 {
        match self {
            Self::Public(_) => 0x00,
            Self::Random(_) => 0x01,
        }
    }

    /// Returns the raw 48-bit address.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> RawAddr {
        match self {
            Self::Public(addr) | Self::Random(addr) => addr,
        }
    }
}

impl Default for Addr {
    #[inline]
    fn default() -> Self {
        Self::Public(RawAddr::default())
    }
}

/// 48-bit untyped device address stored in little-endian byte order.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Creates an address from little-endian bytes.
    #[inline(always)]
    #[must_use]
    pub const fn new(v: [u8; 6]) -> Self {
        Self(v)
    }

    /// Copies an address from a slice. Returns [`None`] if the slice is not
    /// exactly 6 bytes long.
    #[inline]
    #[must_use]
    pub fn from_slice(v: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(v).ok().map(Self)
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for RawAddr {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [Vol 3] Part C, Section 3.2.1.3
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Legacy advertising PDU type reported with each advertising report
/// ([Vol 4] Part E, Section 7.7.65.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum AdvKind {
    /// Connectable and scannable undirected advertising.
    AdvInd = 0x00,
    /// Connectable directed advertising.
    AdvDirectInd = 0x01,
    /// Scannable undirected advertising.
    AdvScanInd = 0x02,
    /// Non-connectable undirected advertising.
    AdvNonconnInd = 0x03,
    /// Scan response.
    ScanRsp = 0x04,
}

impl AdvKind {
    /// Returns whether the advertiser accepts connections.
    #[inline]
    #[must_use]
    pub const fn is_connectable(self) -> bool {
        matches!(self, Self::AdvInd | Self::AdvDirectInd)
    }
}

/// Connection handle assigned by the adapter ([Vol 4] Part E, Section 5.4.2).
/// Handle values are reused after disconnection.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// Maximum valid connection handle.
    const MAX: u16 = 0xEFF;

    /// Wraps a raw connection handle. Returns `None` if the handle is invalid.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        if v <= Self::MAX {
            Some(Self(v))
        } else {
            None
        }
    }
}

impl From<ConnHandle> for u16 {
    #[inline]
    fn from(cn: ConnHandle) -> Self {
        cn.0
    }
}

impl Debug for ConnHandle {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#05X})", name_of!(ConnHandle), self.0)
    }
}

impl Display for ConnHandle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
