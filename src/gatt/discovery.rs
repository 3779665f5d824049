use std::collections::HashMap;
use std::mem::take;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::att::{Handle, HandleRange};
use crate::gap::Uuid;
use crate::gatt::{BoundCharacteristic, CharProps, DiscoveredService, Registry, ServiceBinding};
use crate::host::Status;
use crate::le::ConnHandle;

/// Characteristic declaration reported by the peer
/// ([Vol 3] Part G, Section 3.3.1).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DiscoveredCharacteristic {
    /// Declaration handle.
    pub decl: Handle,
    /// Value handle.
    pub value: Handle,
    pub props: CharProps,
    pub uuid: Uuid,
}

impl DiscoveredCharacteristic {
    /// Creates a characteristic record from raw handles. Returns [`None`] if
    /// either handle is invalid.
    #[inline]
    #[must_use]
    pub fn new(decl: u16, value: u16, props: CharProps, uuid: impl Into<Uuid>) -> Option<Self> {
        Some(Self {
            decl: Handle::new(decl)?,
            value: Handle::new(value)?,
            props,
            uuid: uuid.into(),
        })
    }
}

/// Discovery state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    ServicesDiscovering,
    ServicesDiscovered,
    /// Discovering characteristics of the service binding at the index.
    CharacteristicsDiscovering(usize),
    Bound,
    Failed,
}

/// Next step requested by [`Discovery`].
#[derive(Debug)]
#[must_use]
pub enum Action {
    DiscoverServices(ConnHandle),
    DiscoverCharacteristics(ConnHandle, HandleRange),
    /// Discovery finished with the specified service bindings.
    Done(HashMap<Uuid, ServiceBinding>),
    /// Service discovery failed. The link should be torn down.
    Fail(Status),
}

/// Service and characteristic discovery state machine. The machine performs
/// no I/O. The caller executes each [`Action`] and feeds the results back
/// until [`Action::Done`] or [`Action::Fail`] is returned. At most one
/// request is outstanding at any time.
#[derive(Debug)]
pub struct Discovery {
    hdl: ConnHandle,
    registry: Arc<Registry>,
    state: State,
    services: Vec<DiscoveredService>,
    bindings: Vec<ServiceBinding>,
    chars: Vec<DiscoveredCharacteristic>,
}

impl Discovery {
    /// Creates a state machine for connection `hdl`.
    #[must_use]
    pub fn new(hdl: ConnHandle, registry: Arc<Registry>) -> Self {
        Self {
            hdl,
            registry,
            state: State::Idle,
            services: Vec::new(),
            bindings: Vec::new(),
            chars: Vec::new(),
        }
    }

    /// Returns the connection handle.
    #[inline(always)]
    #[must_use]
    pub const fn conn(&self) -> ConnHandle {
        self.hdl
    }

    /// Returns the current state.
    #[inline(always)]
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Starts primary service discovery.
    pub fn start(&mut self) -> Action {
        debug_assert_eq!(self.state, State::Idle);
        debug!("Discovering services on {}", self.hdl);
        self.state = State::ServicesDiscovering;
        Action::DiscoverServices(self.hdl)
    }

    /// Records a discovered service.
    pub fn service(&mut self, s: DiscoveredService) {
        if self.state != State::ServicesDiscovering {
            warn!("Unexpected service {s:?} in {:?}", self.state);
            return;
        }
        trace!("Service {} {:?}", s.uuid, s.range);
        self.services.push(s);
    }

    /// Completes service discovery. Returns [`None`] if service discovery was
    /// not in progress.
    pub fn services_done(&mut self, r: Result<(), Status>) -> Option<Action> {
        if self.state != State::ServicesDiscovering {
            warn!("Unexpected end of service discovery in {:?}", self.state);
            return None;
        }
        let services = take(&mut self.services);
        if let Err(status) = r {
            warn!("Service discovery failed on {} ({status})", self.hdl);
            self.state = State::Failed;
            return Some(Action::Fail(status));
        }
        self.state = State::ServicesDiscovered;
        let matched = self.registry.match_services(&services);
        let mut bindings: Vec<_> = matched.into_values().collect();
        bindings.sort_by_key(|b| b.handle_range().start());
        debug!(
            "Matched {} of {} services on {}",
            bindings.len(),
            services.len(),
            self.hdl
        );
        self.bindings = bindings;
        Some(self.next_service(0))
    }

    /// Records a discovered characteristic of the current service.
    pub fn characteristic(&mut self, c: DiscoveredCharacteristic) {
        if !matches!(self.state, State::CharacteristicsDiscovering(_)) {
            warn!("Unexpected characteristic {c:?} in {:?}", self.state);
            return;
        }
        trace!("Characteristic {} {:?} {:?}", c.uuid, c.value, c.props);
        self.chars.push(c);
    }

    /// Completes characteristic discovery for the current service. On
    /// success, characteristics matching the service schema are bound. On
    /// failure, the service binding remains empty. Returns [`None`] if
    /// characteristic discovery was not in progress.
    pub fn characteristics_done(&mut self, r: Result<(), Status>) -> Option<Action> {
        let State::CharacteristicsDiscovering(i) = self.state else {
            warn!("Unexpected end of characteristic discovery in {:?}", self.state);
            return None;
        };
        let chars = take(&mut self.chars);
        let b = &mut self.bindings[i];
        match (r, self.registry.get(b.uuid())) {
            (Ok(()), Some(desc)) => {
                for c in chars {
                    let Some(s) = desc.schema(c.uuid) else {
                        trace!("Skipping unregistered characteristic {}", c.uuid);
                        continue;
                    };
                    if !c.props.contains(s.props()) {
                        debug!(
                            "Characteristic {:?} has {:?}, expected {:?}",
                            s.name(),
                            c.props,
                            s.props()
                        );
                    }
                    let uuid = b.uuid();
                    b.bind(BoundCharacteristic::new(self.hdl, c.value, uuid, s.name(), c.props));
                }
            }
            (Ok(()), None) => {}
            (Err(status), _) => {
                warn!("Characteristic discovery failed for {} ({status})", b.uuid());
            }
        }
        Some(self.next_service(i + 1))
    }

    /// Requests characteristic discovery for binding `i` or finishes if all
    /// bindings are done.
    fn next_service(&mut self, i: usize) -> Action {
        if let Some(b) = self.bindings.get(i) {
            self.state = State::CharacteristicsDiscovering(i);
            return Action::DiscoverCharacteristics(self.hdl, b.handle_range());
        }
        self.state = State::Bound;
        debug!("Discovery finished on {}", self.hdl);
        Action::Done(take(&mut self.bindings).into_iter().map(|b| (b.uuid(), b)).collect())
    }
}
