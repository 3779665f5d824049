use std::collections::HashMap;
use std::iter::FusedIterator;

use tracing::{debug, trace};

use crate::att::HandleRange;
use crate::gap::Uuid;
use crate::gatt::{CharProps, ServiceBinding};
use crate::{Error, Result};

/// Expected characteristic of a registered service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharacteristicSchema {
    name: &'static str,
    uuid: Uuid,
    props: CharProps,
}

impl CharacteristicSchema {
    /// Creates a schema entry that binds characteristic `uuid` to field
    /// `name`.
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str, uuid: Uuid, props: CharProps) -> Self {
        Self { name, uuid, props }
    }

    /// Returns the field name.
    #[inline(always)]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the characteristic UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the expected characteristic properties.
    #[inline(always)]
    #[must_use]
    pub const fn props(&self) -> CharProps {
        self.props
    }
}

/// Statically defined service schema.
///
/// ```
/// # use blesync::gatt::{CharProps, Characteristic, CharacteristicSchema, Service, ServiceDescriptor};
/// static BATTERY: ServiceDescriptor = ServiceDescriptor::new(
///     Service::Battery.uuid(),
///     &[CharacteristicSchema::new(
///         "level",
///         Characteristic::BatteryLevel.uuid(),
///         CharProps::READ.union(CharProps::NOTIFY),
///     )],
/// );
/// assert_eq!(BATTERY.characteristics().len(), 1);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServiceDescriptor {
    uuid: Uuid,
    characteristics: &'static [CharacteristicSchema],
}

impl ServiceDescriptor {
    /// Creates a service descriptor.
    #[inline]
    #[must_use]
    pub const fn new(uuid: Uuid, characteristics: &'static [CharacteristicSchema]) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the expected characteristics in definition order.
    #[inline(always)]
    #[must_use]
    pub const fn characteristics(&self) -> &'static [CharacteristicSchema] {
        self.characteristics
    }

    /// Returns the first schema entry for characteristic `uuid`.
    #[must_use]
    pub fn schema(&self, uuid: Uuid) -> Option<&'static CharacteristicSchema> {
        self.characteristics.iter().find(|s| s.uuid == uuid)
    }
}

/// Primary service reported by the peer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DiscoveredService {
    pub range: HandleRange,
    pub uuid: Uuid,
}

impl DiscoveredService {
    /// Creates a service record from raw handles. Returns [`None`] if the
    /// handle range is invalid.
    #[inline]
    #[must_use]
    pub fn new(start: u16, end: u16, uuid: impl Into<Uuid>) -> Option<Self> {
        Some(Self {
            range: HandleRange::from_raw(start, end)?,
            uuid: uuid.into(),
        })
    }
}

/// Registered service descriptors. Each UUID maps to at most one descriptor.
#[derive(Clone, Debug, Default)]
pub struct Registry(HashMap<Uuid, ServiceDescriptor>);

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service descriptor. The existing registration is kept if
    /// the UUID is already registered.
    pub fn register(&mut self, desc: ServiceDescriptor) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.0.entry(desc.uuid) {
            Entry::Occupied(_) => Err(Error::DuplicateService(desc.uuid)),
            Entry::Vacant(e) => {
                debug!("Registered service {}", desc.uuid);
                e.insert(desc);
                Ok(())
            }
        }
    }

    /// Returns the descriptor for service `uuid`.
    #[inline]
    #[must_use]
    pub fn get(&self, uuid: impl Into<Uuid>) -> Option<&ServiceDescriptor> {
        self.0.get(&uuid.into())
    }

    /// Returns the number of registered services.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the registry is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over all registered descriptors in arbitrary
    /// order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &ServiceDescriptor> + FusedIterator {
        self.0.values()
    }

    /// Creates an empty binding for every discovered service that has a
    /// registered descriptor. Unregistered services are skipped. If a UUID is
    /// discovered more than once, the last instance is used.
    #[must_use]
    pub fn match_services(&self, services: &[DiscoveredService]) -> HashMap<Uuid, ServiceBinding> {
        let mut m = HashMap::with_capacity(services.len().min(self.0.len()));
        for s in services {
            if !self.0.contains_key(&s.uuid) {
                trace!("Skipping unregistered service {} {:?}", s.uuid, s.range);
                continue;
            }
            if m.insert(s.uuid, ServiceBinding::new(s.uuid, s.range)).is_some() {
                debug!("Service {} discovered more than once", s.uuid);
            }
        }
        m
    }
}
