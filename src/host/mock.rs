//! Scripted adapter for tests.

use std::ops::RangeBounds;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;

/// Installs a test log subscriber.
pub(crate) fn init_log() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Command issued to [`MockAdapter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Cmd {
    SetActive(bool),
    StartScan(ScanParams),
    StopScan,
    Connect(Addr),
    Disconnect(ConnHandle),
    DiscoverServices(ConnHandle),
    DiscoverCharacteristics(ConnHandle, HandleRange),
    Write(ConnHandle, Handle, Vec<u8>),
    Notify(ConnHandle, Handle, Vec<u8>),
}

/// Peer behavior replayed by [`MockAdapter`].
#[derive(Clone, Debug)]
pub(crate) struct Script {
    /// Reports produced by each scan, followed by `ScanComplete`.
    pub reports: Vec<AdvReport>,
    /// Connection result.
    pub connect: Option<std::result::Result<ConnHandle, Status>>,
    pub services: Vec<DiscoveredService>,
    pub services_result: std::result::Result<(), Status>,
    /// Error returned by the service discovery command itself.
    pub services_refused: Option<Error>,
    pub characteristics: Vec<DiscoveredCharacteristic>,
    /// Characteristic discovery failures by service start handle.
    pub characteristics_fail: Vec<(Handle, Status)>,
    /// Characteristic discovery commands rejected by service start handle.
    pub characteristics_refused: Vec<(Handle, Error)>,
    /// Peer disconnects after reporting this many services.
    pub disconnect_after_services: Option<usize>,
    /// Service discovery requests are never answered.
    pub silent_discovery: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reports: Vec::new(),
            connect: None,
            services: Vec::new(),
            services_result: Ok(()),
            services_refused: None,
            characteristics: Vec::new(),
            characteristics_fail: Vec::new(),
            characteristics_refused: Vec::new(),
            disconnect_after_services: None,
            silent_discovery: false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    tx: Option<EventSender>,
    script: Script,
    log: Vec<Cmd>,
    scan: Option<CancellationToken>,
}

/// Adapter that answers commands from a [`Script`] and records them.
#[derive(Debug, Default)]
pub(crate) struct MockAdapter(Mutex<Inner>);

impl MockAdapter {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Inner {
            script,
            ..Inner::default()
        })))
    }

    /// Returns all commands issued so far.
    pub fn log(&self) -> Vec<Cmd> {
        self.0.lock().log.clone()
    }

    /// Returns whether the log contains `cmd`.
    pub fn issued(&self, cmd: &Cmd) -> bool {
        self.0.lock().log.contains(cmd)
    }

    /// Drops the event sender. The queue closes once all pending events are
    /// delivered.
    pub fn detach(&self) {
        self.0.lock().tx = None;
    }

    /// Sends events from a background task.
    pub fn inject(&self, evts: impl IntoIterator<Item = Event>) {
        self.spawn(evts.into_iter().collect(), None);
    }

    fn spawn(&self, evts: Vec<Event>, cancel: Option<CancellationToken>) {
        let Some(tx) = self.0.lock().tx.clone() else {
            return;
        };
        tokio::spawn(async move {
            let cancel = cancel.unwrap_or_default();
            for evt in evts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    r = tx.send(evt) => if r.is_err() {
                        return;
                    },
                }
            }
            cancel.cancel();
        });
    }

    fn record(&self, cmd: Cmd) {
        self.0.lock().log.push(cmd);
    }
}

impl Adapter for MockAdapter {
    fn attach(&self, tx: EventSender) {
        self.0.lock().tx = Some(tx);
    }

    fn set_active(&self, on: bool) -> Result<()> {
        self.record(Cmd::SetActive(on));
        Ok(())
    }

    fn start_scan(&self, params: &ScanParams) -> Result<()> {
        let (reports, cancel) = {
            let mut inner = self.0.lock();
            if inner.scan.as_ref().map_or(false, |c| !c.is_cancelled()) {
                return Err(Error::Busy);
            }
            inner.log.push(Cmd::StartScan(*params));
            let cancel = CancellationToken::new();
            inner.scan = Some(cancel.clone());
            (inner.script.reports.clone(), cancel)
        };
        let mut evts: Vec<_> = reports.into_iter().map(Event::AdvReport).collect();
        evts.push(Event::ScanComplete);
        self.spawn(evts, Some(cancel));
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        let mut inner = self.0.lock();
        inner.log.push(Cmd::StopScan);
        if let Some(c) = inner.scan.take() {
            c.cancel();
        }
        Ok(())
    }

    fn connect(&self, addr: Addr) -> Result<()> {
        self.record(Cmd::Connect(addr));
        let r = self.0.lock().script.connect;
        let evt = match r {
            Some(Ok(hdl)) => Event::Connected { addr, hdl },
            Some(Err(status)) => Event::ConnectFailed { addr, status },
            None => return Err(Error::Failed(Status::UNSPECIFIED)),
        };
        self.spawn(vec![evt], None);
        Ok(())
    }

    fn disconnect(&self, hdl: ConnHandle) -> Result<()> {
        self.record(Cmd::Disconnect(hdl));
        Ok(())
    }

    fn discover_services(&self, hdl: ConnHandle) -> Result<()> {
        self.record(Cmd::DiscoverServices(hdl));
        let s = self.0.lock().script.clone();
        if let Some(e) = s.services_refused {
            return Err(e);
        }
        if s.silent_discovery {
            return Ok(());
        }
        let mut evts: Vec<_> = (s.services.iter())
            .map(|&service| Event::Service { hdl, service })
            .collect();
        if let Some(n) = s.disconnect_after_services {
            evts.truncate(n);
            evts.push(Event::Disconnected {
                hdl,
                reason: Status::REMOTE_USER_TERMINATED,
            });
        } else {
            evts.push(Event::ServicesDone {
                hdl,
                result: s.services_result,
            });
        }
        self.spawn(evts, None);
        Ok(())
    }

    fn discover_characteristics(&self, hdl: ConnHandle, range: HandleRange) -> Result<()> {
        self.record(Cmd::DiscoverCharacteristics(hdl, range));
        let s = self.0.lock().script.clone();
        let refused = s.characteristics_refused.iter().find(|f| f.0 == range.start());
        if let Some(&(_, e)) = refused {
            return Err(e);
        }
        let mut evts: Vec<_> = (s.characteristics.iter())
            .filter(|c| range.contains(&c.decl))
            .map(|&characteristic| Event::Characteristic {
                hdl,
                characteristic,
            })
            .collect();
        let result = match s.characteristics_fail.iter().find(|f| f.0 == range.start()) {
            Some(&(_, status)) => Err(status),
            None => Ok(()),
        };
        evts.push(Event::CharacteristicsDone { hdl, result });
        self.spawn(evts, None);
        Ok(())
    }

    fn write(&self, hdl: ConnHandle, val: Handle, data: &[u8]) -> Result<()> {
        self.record(Cmd::Write(hdl, val, data.to_vec()));
        Ok(())
    }

    fn notify(&self, hdl: ConnHandle, val: Handle, data: &[u8]) -> Result<()> {
        self.record(Cmd::Notify(hdl, val, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::le::RawAddr;

    use super::*;

    #[test]
    fn default_script() {
        let s = Script::default();
        assert_eq!(s.services_result, Ok(()));
        assert!(s.connect.is_none());
        assert!(s.services_refused.is_none());
        assert!(!s.silent_discovery);
        let m = MockAdapter::new(s);
        assert_eq!(
            m.connect(Addr::Public(RawAddr::new([1, 2, 3, 4, 5, 6]))),
            Err(Error::Failed(Status::UNSPECIFIED))
        );
        assert_eq!(m.log().len(), 1);
    }
}
