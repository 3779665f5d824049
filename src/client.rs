//! GATT client driving scan, connection, and discovery over a host adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, trace, warn};

use crate::att::Handle;
use crate::config::{Config, ScanParams};
use crate::gap::Uuid;
use crate::gatt::{Action, BoundCharacteristic, Discovery, Registry, ServiceBinding, Shared};
use crate::host::{Adapter, Event, EventReceiver, ValueEvent};
use crate::le::{Addr, ConnHandle};
use crate::scan::Scan;
use crate::{host, Error, Result};

/// Central-role client. All operations that wait for adapter events take
/// `&mut self`, so the client is driven by a single task.
#[derive(Debug)]
pub struct Client {
    shared: Arc<Shared>,
    registry: Arc<Registry>,
    evt: EventReceiver,
    cfg: Config,
}

impl Client {
    /// Creates a client that uses `adapter` and the services registered in
    /// `registry`.
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>, registry: Registry) -> Self {
        Self::with_config(adapter, registry, &Config::default())
    }

    /// Creates a client with the specified configuration.
    #[must_use]
    pub fn with_config(adapter: Arc<dyn Adapter>, registry: Registry, cfg: &Config) -> Self {
        let (tx, evt) = host::events();
        adapter.attach(tx);
        Self {
            shared: Shared::new(adapter),
            registry: Arc::new(registry),
            evt,
            cfg: *cfg,
        }
    }

    /// Returns the service registry.
    #[inline(always)]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the configured default scan parameters.
    #[inline(always)]
    #[must_use]
    pub const fn scan_params(&self) -> ScanParams {
        self.cfg.scan
    }

    /// Activates the adapter and starts scanning.
    pub fn scan(&mut self, params: ScanParams) -> Result<Scan<'_>> {
        let a = self.adapter();
        a.set_active(true)?;
        a.start_scan(&params)?;
        debug!("Scanning with {params:?}");
        Ok(Scan::new(self))
    }

    /// Connects to `addr` and discovers registered services. If the returned
    /// future is dropped after the link is established, the link is
    /// disconnected.
    pub async fn connect(&mut self, addr: Addr) -> Result<Connection> {
        let shared = Arc::clone(&self.shared);
        let a = shared.adapter.as_ref();
        a.set_active(true)?;
        a.connect(addr)?;
        debug!("Connecting to {addr:?}");
        let hdl = loop {
            match self.recv().await? {
                Event::Connected { addr: peer, hdl } if peer == addr => break hdl,
                Event::ConnectFailed { addr: peer, status } if peer == addr => {
                    warn!("Connection to {addr:?} failed ({status})");
                    return Err(Error::Connect { addr, status });
                }
                evt => self.dispatch(evt),
            }
        };
        debug!("Connected to {addr:?} as {hdl}");

        let mut guard = LinkGuard::new(Arc::clone(&shared), hdl);
        let mut d = Discovery::new(hdl, Arc::clone(&self.registry));
        let mut act = d.start();
        let mut services = loop {
            // A refused request completes the current step with its status
            let next = match act {
                Action::DiscoverServices(hdl) => match a.discover_services(hdl) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Service discovery on {hdl} refused ({e})");
                        d.services_done(Err(e.status()))
                    }
                },
                Action::DiscoverCharacteristics(hdl, range) => {
                    match a.discover_characteristics(hdl, range) {
                        Ok(()) => None,
                        Err(e) => {
                            warn!("Characteristic discovery on {hdl} refused ({e})");
                            d.characteristics_done(Err(e.status()))
                        }
                    }
                }
                Action::Done(services) => break services,
                Action::Fail(status) => return Err(Error::DiscoveryFailed { hdl, status }),
            };
            act = match next {
                Some(next) => next,
                None => self.discovery_event(&mut d, &mut guard).await?,
            };
        };
        let gen = shared.install(hdl, &mut services);
        guard.release();
        Ok(Connection {
            addr,
            hdl,
            gen,
            services,
        })
    }

    /// Disconnects `conn` and invalidates all of its bound characteristics.
    /// Does nothing if the connection was already torn down.
    pub fn disconnect(&mut self, conn: &Connection) -> Result<()> {
        if !self.shared.teardown_gen(conn.hdl, conn.gen) {
            debug!("{} is already disconnected", conn.hdl);
            return Ok(());
        }
        debug!("Disconnecting {}", conn.hdl);
        Ok(self.adapter().disconnect(conn.hdl)?)
    }

    /// Returns the bound characteristic for value handle `val` of connection
    /// `hdl`.
    #[inline]
    #[must_use]
    pub fn route(&self, hdl: ConnHandle, val: Handle) -> Option<BoundCharacteristic> {
        self.shared.route(hdl, val)
    }

    /// Returns the next inbound value event for a bound characteristic.
    /// Events for unknown handles are discarded. Returns [`None`] if the
    /// adapter closed the event queue.
    ///
    /// Only this method delivers value events. Notifications and indications
    /// received while [`Self::scan`] or [`Self::connect`] is waiting for
    /// adapter events are dropped, even for bound characteristics.
    pub async fn next_event(&mut self) -> Option<ValueEvent> {
        loop {
            match self.evt.recv().await? {
                Event::Value(v) if self.shared.route(v.hdl, v.val).is_some() => return Some(v),
                Event::Value(v) => trace!("Discarding {} for unknown {:?}", v.kind, v.val),
                evt => self.dispatch(evt),
            }
        }
    }

    /// Returns the adapter.
    #[inline(always)]
    pub(crate) fn adapter(&self) -> &dyn Adapter {
        self.shared.adapter.as_ref()
    }

    /// Polls for the next adapter event.
    #[inline]
    pub(crate) fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.evt.poll_recv(cx)
    }

    /// Handles an event that no operation is waiting for.
    pub(crate) fn dispatch(&mut self, evt: Event) {
        match evt {
            Event::Disconnected { hdl, reason } => {
                if self.shared.teardown(hdl) {
                    debug!("{hdl} disconnected ({reason})");
                }
            }
            Event::Value(v) => trace!("Discarding {} for {:?}", v.kind, v.val),
            evt => trace!("Ignoring {evt:?}"),
        }
    }

    /// Feeds adapter events for `d`'s connection into the discovery state
    /// machine until it produces the next action.
    async fn discovery_event(
        &mut self,
        d: &mut Discovery,
        guard: &mut LinkGuard,
    ) -> Result<Action> {
        let hdl = d.conn();
        loop {
            let next = match self.recv().await? {
                Event::Service { hdl: h, service } if h == hdl => {
                    d.service(service);
                    None
                }
                Event::ServicesDone { hdl: h, result } if h == hdl => d.services_done(result),
                Event::Characteristic {
                    hdl: h,
                    characteristic,
                } if h == hdl => {
                    d.characteristic(characteristic);
                    None
                }
                Event::CharacteristicsDone { hdl: h, result } if h == hdl => {
                    d.characteristics_done(result)
                }
                Event::Disconnected { hdl: h, reason } if h == hdl => {
                    warn!("{hdl} disconnected during discovery ({reason})");
                    guard.release();
                    self.shared.teardown(hdl);
                    return Err(Error::DiscoveryFailed {
                        hdl,
                        status: reason,
                    });
                }
                evt => {
                    self.dispatch(evt);
                    None
                }
            };
            if let Some(next) = next {
                return Ok(next);
            }
        }
    }

    async fn recv(&mut self) -> Result<Event> {
        self.evt.recv().await.ok_or(Error::Closed)
    }
}

/// Established connection with its service bindings.
#[derive(Clone, Debug)]
pub struct Connection {
    addr: Addr,
    hdl: ConnHandle,
    gen: u64,
    services: HashMap<Uuid, ServiceBinding>,
}

impl Connection {
    /// Returns the peer address.
    #[inline(always)]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    /// Returns the connection handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> ConnHandle {
        self.hdl
    }

    /// Returns the binding for service `uuid`.
    #[inline]
    #[must_use]
    pub fn service(&self, uuid: impl Into<Uuid>) -> Option<&ServiceBinding> {
        self.services.get(&uuid.into())
    }

    /// Returns all service bindings.
    #[inline(always)]
    #[must_use]
    pub const fn services(&self) -> &HashMap<Uuid, ServiceBinding> {
        &self.services
    }
}

/// Disconnects a link that did not finish discovery.
#[derive(Debug)]
struct LinkGuard {
    shared: Option<Arc<Shared>>,
    hdl: ConnHandle,
}

impl LinkGuard {
    #[inline]
    fn new(shared: Arc<Shared>, hdl: ConnHandle) -> Self {
        Self {
            shared: Some(shared),
            hdl,
        }
    }

    #[inline]
    fn release(&mut self) {
        self.shared = None;
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        debug!("Disconnecting {} after incomplete discovery", self.hdl);
        if let Err(e) = shared.adapter.disconnect(self.hdl) {
            warn!("Failed to disconnect {} ({e})", self.hdl);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use matches::assert_matches;

    use crate::att::HandleRange;
    use crate::gatt::{
        CharProps, Characteristic, CharacteristicSchema, DiscoveredCharacteristic,
        DiscoveredService, Service, ServiceDescriptor,
    };
    use crate::host::mock::{init_log, Cmd, MockAdapter, Script};
    use crate::host::{Status, ValueKind};
    use crate::le::RawAddr;

    use super::*;

    static BATTERY: ServiceDescriptor = ServiceDescriptor::new(
        Service::Battery.uuid(),
        &[CharacteristicSchema::new(
            "level",
            Characteristic::BatteryLevel.uuid(),
            CharProps::NOTIFY,
        )],
    );

    static HEART_RATE: ServiceDescriptor = ServiceDescriptor::new(
        Service::HeartRate.uuid(),
        &[CharacteristicSchema::new(
            "measurement",
            Characteristic::HeartRateMeasurement.uuid(),
            CharProps::NOTIFY,
        )],
    );

    const PEER: Addr = Addr::Random(RawAddr::new([1, 2, 3, 4, 5, 0xC6]));

    fn hdl() -> ConnHandle {
        ConnHandle::new(0x40).unwrap()
    }

    fn handle(h: u16) -> Handle {
        Handle::new(h).unwrap()
    }

    fn script() -> Script {
        Script {
            connect: Some(Ok(hdl())),
            services: vec![DiscoveredService::new(1, 4, Service::Battery).unwrap()],
            characteristics: vec![DiscoveredCharacteristic::new(
                2,
                3,
                CharProps::NOTIFY,
                Characteristic::BatteryLevel,
            )
            .unwrap()],
            ..Script::default()
        }
    }

    fn client(s: Script) -> (Arc<MockAdapter>, Client) {
        init_log();
        let mock = MockAdapter::new(s);
        let mut r = Registry::new();
        r.register(BATTERY).unwrap();
        r.register(HEART_RATE).unwrap();
        (Arc::clone(&mock), Client::new(mock, r))
    }

    fn value(val: u16, data: &[u8]) -> Event {
        Event::Value(ValueEvent {
            hdl: hdl(),
            val: handle(val),
            kind: ValueKind::Notification,
            data: data.to_vec(),
        })
    }

    #[tokio::test]
    async fn battery_level() {
        let (mock, mut c) = client(script());
        let conn = c.connect(PEER).await.unwrap();
        assert_eq!(conn.addr(), PEER);
        assert_eq!(conn.handle(), hdl());
        assert_eq!(conn.services().len(), 1);
        assert_eq!(
            mock.log(),
            [
                Cmd::SetActive(true),
                Cmd::Connect(PEER),
                Cmd::DiscoverServices(hdl()),
                Cmd::DiscoverCharacteristics(hdl(), HandleRange::from_raw(1, 4).unwrap()),
            ]
        );

        let level = conn.service(Service::Battery).unwrap().characteristic("level");
        let level = level.unwrap();
        assert_eq!(level.value_handle(), handle(3));
        assert_eq!(level.service(), Service::Battery);
        assert!(level.is_valid());

        let hit = c.route(hdl(), handle(3)).unwrap();
        assert_eq!(hit.name(), "level");
        assert!(c.route(hdl(), handle(99)).is_none());

        level.notify(&[0x55]).unwrap();
        level.write(&[0x01, 0x00]).unwrap();
        assert!(mock.issued(&Cmd::Notify(hdl(), handle(3), vec![0x55])));
        assert!(mock.issued(&Cmd::Write(hdl(), handle(3), vec![0x01, 0x00])));
    }

    #[tokio::test]
    async fn next_event() {
        let (mock, mut c) = client(script());
        let _conn = c.connect(PEER).await.unwrap();
        mock.inject([value(99, &[1]), value(3, &[0x64])]);
        let v = c.next_event().await.unwrap();
        assert_eq!(v.val, handle(3));
        assert_eq!(v.kind, ValueKind::Notification);
        assert_eq!(v.data, [0x64]);
        mock.detach();
        assert_eq!(c.next_event().await, None);
    }

    #[tokio::test]
    async fn stale_after_disconnect() {
        let (mock, mut c) = client(script());
        let conn = c.connect(PEER).await.unwrap();
        let level = conn.service(Service::Battery).unwrap().characteristic("level").unwrap();
        c.disconnect(&conn).unwrap();
        assert!(mock.issued(&Cmd::Disconnect(hdl())));
        assert!(!level.is_valid());
        assert_matches!(
            level.write(&[1]),
            Err(Error::StaleHandle { hdl: h, val: v }) if h == hdl() && v == handle(3)
        );
        assert_matches!(level.notify(&[1]), Err(Error::StaleHandle { .. }));
        assert!(c.route(hdl(), handle(3)).is_none());

        // Second disconnect does nothing
        c.disconnect(&conn).unwrap();
        let n = (mock.log().iter()).filter(|&c| *c == Cmd::Disconnect(hdl())).count();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn peer_disconnect() {
        let (mock, mut c) = client(script());
        let conn = c.connect(PEER).await.unwrap();
        let level = conn.service(Service::Battery).unwrap().characteristic("level").unwrap();
        mock.inject([
            Event::Disconnected {
                hdl: hdl(),
                reason: Status::REMOTE_USER_TERMINATED,
            },
            value(3, &[0x64]),
        ]);
        mock.detach();
        assert_eq!(c.next_event().await, None);
        assert!(!level.is_valid());
        assert!(c.route(hdl(), handle(3)).is_none());
    }

    #[tokio::test]
    async fn handle_reuse() {
        let (mock, mut c) = client(script());
        let old = c.connect(PEER).await.unwrap();
        let old = old.service(Service::Battery).unwrap().characteristic("level").unwrap();
        mock.inject([Event::Disconnected {
            hdl: hdl(),
            reason: Status::REMOTE_USER_TERMINATED,
        }]);
        let new = c.connect(PEER).await.unwrap();
        let new = new.service(Service::Battery).unwrap().characteristic("level").unwrap();
        assert_eq!(old.conn(), new.conn());
        assert!(!old.is_valid());
        assert!(new.is_valid());
        assert_matches!(old.write(&[1]), Err(Error::StaleHandle { .. }));
        new.write(&[1]).unwrap();
    }

    #[tokio::test]
    async fn connect_failed() {
        let (mock, mut c) = client(Script {
            connect: Some(Err(Status::CONNECTION_FAILED)),
            ..script()
        });
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::Connect { addr, status }) if addr == PEER && status == Status::CONNECTION_FAILED
        );
        assert!(!mock.issued(&Cmd::DiscoverServices(hdl())));

        let (_, mut c) = client(Script::default());
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::Host(host::Error::Failed(_)))
        );
    }

    #[tokio::test]
    async fn discovery_failed() {
        let (mock, mut c) = client(Script {
            services_result: Err(Status::UNSPECIFIED),
            ..script()
        });
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::DiscoveryFailed { hdl: h, status }) if h == hdl() && status == Status::UNSPECIFIED
        );
        assert!(mock.issued(&Cmd::Disconnect(hdl())));
        assert!(!mock.log().iter().any(|c| matches!(c, Cmd::DiscoverCharacteristics(..))));
        assert!(c.route(hdl(), handle(3)).is_none());
    }

    #[tokio::test]
    async fn disconnected_during_discovery() {
        let (mock, mut c) = client(Script {
            disconnect_after_services: Some(1),
            ..script()
        });
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::DiscoveryFailed { status, .. }) if status == Status::REMOTE_USER_TERMINATED
        );
        // The link is already gone
        assert!(!mock.issued(&Cmd::Disconnect(hdl())));
    }

    #[tokio::test]
    async fn service_failure_leaves_binding_empty() {
        let mut s = script();
        s.services.push(DiscoveredService::new(5, 9, Service::HeartRate).unwrap());
        s.characteristics.push(
            DiscoveredCharacteristic::new(
                6,
                7,
                CharProps::NOTIFY,
                Characteristic::HeartRateMeasurement,
            )
            .unwrap(),
        );
        s.characteristics_fail.push((handle(1), Status::new(0x0A)));
        let (_, mut c) = client(s);
        let conn = c.connect(PEER).await.unwrap();
        assert!(conn.service(Service::Battery).unwrap().is_empty());
        let hr = conn.service(Service::HeartRate).unwrap();
        assert_eq!(hr.len(), 1);
        assert!(hr.characteristic("measurement").unwrap().is_valid());
        assert!(c.route(hdl(), handle(3)).is_none());
        assert!(c.route(hdl(), handle(7)).is_some());
    }

    #[tokio::test]
    async fn refused_characteristic_discovery() {
        let mut s = script();
        s.services.push(DiscoveredService::new(5, 9, Service::HeartRate).unwrap());
        s.characteristics.push(
            DiscoveredCharacteristic::new(
                6,
                7,
                CharProps::NOTIFY,
                Characteristic::HeartRateMeasurement,
            )
            .unwrap(),
        );
        s.characteristics_refused.push((handle(1), host::Error::Busy));
        let (mock, mut c) = client(s);
        let conn = c.connect(PEER).await.unwrap();
        assert!(conn.service(Service::Battery).unwrap().is_empty());
        let hr = conn.service(Service::HeartRate).unwrap();
        assert!(hr.characteristic("measurement").unwrap().is_valid());
        assert!(c.route(hdl(), handle(3)).is_none());
        assert!(c.route(hdl(), handle(7)).is_some());
        assert!(mock.issued(&Cmd::DiscoverCharacteristics(
            hdl(),
            HandleRange::from_raw(5, 9).unwrap()
        )));
        assert!(!mock.issued(&Cmd::Disconnect(hdl())));
    }

    #[tokio::test]
    async fn refused_service_discovery() {
        let (mock, mut c) = client(Script {
            services_refused: Some(host::Error::Failed(Status::new(0x0C))),
            ..script()
        });
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::DiscoveryFailed { hdl: h, status }) if h == hdl() && status == Status::new(0x0C)
        );
        assert!(mock.issued(&Cmd::Disconnect(hdl())));
        assert!(!mock.log().iter().any(|c| matches!(c, Cmd::DiscoverCharacteristics(..))));

        let (_, mut c) = client(Script {
            services_refused: Some(host::Error::Busy),
            ..script()
        });
        assert_matches!(
            c.connect(PEER).await,
            Err(Error::DiscoveryFailed { status, .. }) if status == Status::UNSPECIFIED
        );
    }

    #[tokio::test]
    async fn values_dropped_during_scan() {
        let (mock, mut c) = client(script());
        let _conn = c.connect(PEER).await.unwrap();
        mock.inject([value(3, &[0x64])]);
        tokio::task::yield_now().await;
        let params = c.scan_params().with_duration(100);
        let mut scan = c.scan(params).unwrap();
        assert!(scan.next().await.is_none());
        drop(scan);
        mock.detach();
        assert_eq!(c.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_connect() {
        let (mock, mut c) = client(Script {
            silent_discovery: true,
            ..script()
        });
        let r = tokio::time::timeout(Duration::from_secs(5), c.connect(PEER)).await;
        assert!(r.is_err());
        assert!(mock.issued(&Cmd::DiscoverServices(hdl())));
        assert!(mock.issued(&Cmd::Disconnect(hdl())));
        assert!(c.route(hdl(), handle(3)).is_none());
    }

    #[tokio::test]
    async fn closed() {
        let (mock, mut c) = client(script());
        mock.detach();
        assert_matches!(c.connect(PEER).await, Err(Error::Closed));
        assert!(mock.issued(&Cmd::Connect(PEER)));
    }
}
