//! Advertising device records.

use crate::gap::{AdvFlag, ResponseData, Uuid};
use crate::host::AdvReport;
use crate::le::{Addr, AdvKind};

/// Device observed in a single advertising report. The record owns all of
/// its data and remains valid after the report buffer is reused.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    addr: Addr,
    kind: AdvKind,
    rssi: i8,
    name: String,
    services: Vec<Uuid>,
    flags: AdvFlag,
    appearance: Option<u16>,
    manufacturer_data: Option<(u16, Vec<u8>)>,
}

impl Device {
    /// Creates a device record from an advertising report.
    #[inline]
    #[must_use]
    pub fn new(r: &AdvReport) -> Self {
        Self::from_parts(r.addr, r.kind, r.rssi, &r.response_data())
    }

    /// Creates a device record from decoded advertising data.
    #[must_use]
    pub fn from_parts(addr: Addr, kind: AdvKind, rssi: i8, rd: &ResponseData<'_>) -> Self {
        Self {
            addr,
            kind,
            rssi,
            name: rd.name(),
            services: rd.service_uuids(),
            flags: rd.flags(),
            appearance: rd.appearance(),
            manufacturer_data: rd.manufacturer_data().map(|(id, v)| (id, v.to_vec())),
        }
    }

    /// Returns the device address.
    #[inline(always)]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    /// Returns the advertising PDU type.
    #[inline(always)]
    #[must_use]
    pub const fn kind(&self) -> AdvKind {
        self.kind
    }

    /// Returns whether the device accepts connections.
    #[inline]
    #[must_use]
    pub const fn connectable(&self) -> bool {
        self.kind.is_connectable()
    }

    /// Returns the received signal strength in dBm.
    #[inline(always)]
    #[must_use]
    pub const fn rssi(&self) -> i8 {
        self.rssi
    }

    /// Returns the complete local name or an empty string.
    #[inline(always)]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns advertised service UUIDs.
    #[inline(always)]
    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    /// Returns whether service `uuid` is advertised.
    #[inline]
    #[must_use]
    pub fn has_service(&self, uuid: impl Into<Uuid>) -> bool {
        self.services.contains(&uuid.into())
    }

    /// Returns advertising flags.
    #[inline(always)]
    #[must_use]
    pub const fn flags(&self) -> AdvFlag {
        self.flags
    }

    /// Returns the advertised appearance.
    #[inline(always)]
    #[must_use]
    pub const fn appearance(&self) -> Option<u16> {
        self.appearance
    }

    /// Returns the company identifier and manufacturer-specific data.
    #[inline]
    #[must_use]
    pub fn manufacturer_data(&self) -> Option<(u16, &[u8])> {
        (self.manufacturer_data.as_ref()).map(|(id, v)| (*id, v.as_slice()))
    }
}
