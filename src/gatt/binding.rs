use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::att::{Handle, HandleRange};
use crate::gap::Uuid;
use crate::gatt::CharProps;
use crate::host::Adapter;
use crate::le::ConnHandle;
use crate::{host, Error, Result};

/// Registered service bound to a discovered handle range.
#[derive(Clone, Debug)]
pub struct ServiceBinding {
    uuid: Uuid,
    range: HandleRange,
    chars: Vec<BoundCharacteristic>,
}

impl ServiceBinding {
    #[inline]
    pub(crate) const fn new(uuid: Uuid, range: HandleRange) -> Self {
        Self {
            uuid,
            range,
            chars: Vec::new(),
        }
    }

    /// Returns the service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the service handle range.
    #[inline(always)]
    pub const fn handle_range(&self) -> HandleRange {
        self.range
    }

    /// Returns the characteristic bound to schema field `name`.
    #[must_use]
    pub fn characteristic(&self, name: &str) -> Option<&BoundCharacteristic> {
        self.chars.iter().find(|c| c.name == name)
    }

    /// Returns all bound characteristics in discovery order.
    #[inline]
    pub fn characteristics(&self) -> impl ExactSizeIterator<Item = &BoundCharacteristic> {
        self.chars.iter()
    }

    /// Returns the number of bound characteristics.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Returns whether no characteristics were bound.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Binds a characteristic unless its field is already bound.
    pub(crate) fn bind(&mut self, c: BoundCharacteristic) -> bool {
        if self.characteristic(c.name).is_some() {
            trace!("Ignoring duplicate {:?} for {}", c.name, self.uuid);
            return false;
        }
        self.chars.push(c);
        true
    }
}

/// Characteristic of a connected peer matched to a schema field. The
/// characteristic becomes stale once its connection is torn down, even if
/// the connection handle is later reused.
#[derive(Clone)]
pub struct BoundCharacteristic {
    conn: ConnHandle,
    val: Handle,
    service: Uuid,
    name: &'static str,
    props: CharProps,
    link: Option<Link>,
}

impl BoundCharacteristic {
    #[inline]
    pub(crate) const fn new(
        conn: ConnHandle,
        val: Handle,
        service: Uuid,
        name: &'static str,
        props: CharProps,
    ) -> Self {
        Self {
            conn,
            val,
            service,
            name,
            props,
            link: None,
        }
    }

    /// Returns the connection handle.
    #[inline(always)]
    #[must_use]
    pub const fn conn(&self) -> ConnHandle {
        self.conn
    }

    /// Returns the characteristic value handle.
    #[inline(always)]
    #[must_use]
    pub const fn value_handle(&self) -> Handle {
        self.val
    }

    /// Returns the owning service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn service(&self) -> Uuid {
        self.service
    }

    /// Returns the schema field name.
    #[inline(always)]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the properties reported by the peer.
    #[inline(always)]
    #[must_use]
    pub const fn props(&self) -> CharProps {
        self.props
    }

    /// Returns whether the connection that owns the characteristic is still
    /// established.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.with_live(|_| Ok(())).is_ok()
    }

    /// Writes the characteristic value.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        trace!("Write {:?} {:02X?}", self, data);
        self.with_live(|a| a.write(self.conn, self.val, data))
    }

    /// Sends a characteristic value notification.
    pub fn notify(&self, data: &[u8]) -> Result<()> {
        trace!("Notify {:?} {:02X?}", self, data);
        self.with_live(|a| a.notify(self.conn, self.val, data))
    }

    /// Calls `f` while holding the routing table lock if the characteristic
    /// is not stale.
    fn with_live(&self, f: impl FnOnce(&dyn Adapter) -> host::Result<()>) -> Result<()> {
        let stale = Error::StaleHandle {
            hdl: self.conn,
            val: self.val,
        };
        let Some(link) = self.link.as_ref() else {
            return Err(stale);
        };
        let Some(shared) = link.shared.upgrade() else {
            return Err(stale);
        };
        let tab = shared.table.lock();
        if !tab.is_live(self.conn, link.gen) {
            return Err(stale);
        }
        Ok(f(shared.adapter.as_ref())?)
    }
}

impl Debug for BoundCharacteristic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCharacteristic")
            .field("conn", &self.conn)
            .field("val", &self.val)
            .field("service", &self.service)
            .field("name", &self.name)
            .field("props", &self.props)
            .field("gen", &self.link.as_ref().map(|l| l.gen))
            .finish()
    }
}

/// Reference from a bound characteristic to the routing table. The
/// generation distinguishes connections that reuse a handle.
#[derive(Clone, Debug)]
struct Link {
    shared: Weak<Shared>,
    gen: u64,
}

/// Adapter and routing table shared between the client and its bound
/// characteristics.
#[derive(Debug)]
pub(crate) struct Shared {
    pub adapter: Arc<dyn Adapter>,
    table: Mutex<RoutingTable>,
}

#[derive(Debug, Default)]
struct RoutingTable {
    live: HashMap<ConnHandle, u64>,
    next_gen: u64,
    routes: HashMap<(ConnHandle, Handle), BoundCharacteristic>,
}

impl RoutingTable {
    #[inline]
    fn is_live(&self, hdl: ConnHandle, gen: u64) -> bool {
        self.live.get(&hdl) == Some(&gen)
    }

    fn remove(&mut self, hdl: ConnHandle) -> bool {
        let live = self.live.remove(&hdl).is_some();
        if live {
            self.routes.retain(|&(h, _), _| h != hdl);
        }
        live
    }
}

impl Shared {
    pub fn new(adapter: Arc<dyn Adapter>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            table: Mutex::new(RoutingTable::default()),
        })
    }

    /// Creates a connection context for `hdl`, links all bound
    /// characteristics to it, and adds their routes. Any previous context for
    /// the same handle is removed. Returns the context generation.
    pub fn install(
        self: &Arc<Self>,
        hdl: ConnHandle,
        services: &mut HashMap<Uuid, ServiceBinding>,
    ) -> u64 {
        let mut tab = self.table.lock();
        if tab.remove(hdl) {
            debug!("Replacing existing context for {hdl}");
        }
        tab.next_gen += 1;
        let gen = tab.next_gen;
        tab.live.insert(hdl, gen);
        for c in services.values_mut().flat_map(|s| s.chars.iter_mut()) {
            c.link = Some(Link {
                shared: Arc::downgrade(self),
                gen,
            });
            tab.routes.insert((hdl, c.val), c.clone());
        }
        debug!("Installed context for {hdl} (gen={gen}, routes={})", tab.routes.len());
        gen
    }

    /// Removes the context for `hdl` and all of its routes. Returns whether a
    /// context existed.
    pub fn teardown(&self, hdl: ConnHandle) -> bool {
        let live = self.table.lock().remove(hdl);
        if live {
            debug!("Removed context for {hdl}");
        }
        live
    }

    /// Removes the context for `hdl` if it is generation `gen`.
    pub fn teardown_gen(&self, hdl: ConnHandle, gen: u64) -> bool {
        let mut tab = self.table.lock();
        tab.is_live(hdl, gen) && tab.remove(hdl)
    }

    /// Returns whether context generation `gen` for `hdl` is established.
    pub fn is_live(&self, hdl: ConnHandle, gen: u64) -> bool {
        self.table.lock().is_live(hdl, gen)
    }

    /// Returns the characteristic registered for `(hdl, val)`.
    pub fn route(&self, hdl: ConnHandle, val: Handle) -> Option<BoundCharacteristic> {
        self.table.lock().routes.get(&(hdl, val)).cloned()
    }
}
