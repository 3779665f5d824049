//! Host adapter boundary.
//!
//! The radio, link layer, and GATT transport are provided by an [`Adapter`]
//! implementation. Commands are issued synchronously and complete through
//! [`Event`]s delivered over a bounded queue with room for a single pending
//! event, so an adapter producing events faster than the client consumes them
//! is suspended until the client catches up.

use std::fmt::{Debug, Display, Formatter};
use std::task::{Context, Poll};

use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::att::{Handle, HandleRange};
use crate::config::ScanParams;
use crate::gap::ResponseData;
use crate::gatt::{DiscoveredCharacteristic, DiscoveredService};
use crate::le::{Addr, AdvKind, ConnHandle};
use crate::util::name_of;

#[cfg(test)]
pub(crate) mod mock;

/// Adapter errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("adapter is not active")]
    Inactive,
    #[error("adapter is busy")]
    Busy,
    #[error("adapter command failed ({0})")]
    Failed(Status),
    #[error("event queue closed")]
    Closed,
}

impl Error {
    /// Returns the adapter status code, or [`Status::UNSPECIFIED`] if the
    /// error did not carry one.
    #[inline]
    #[must_use]
    pub const fn status(self) -> Status {
        match self {
            Self::Failed(s) => s,
            _ => Status::UNSPECIFIED,
        }
    }
}

impl From<Status> for Error {
    #[inline]
    fn from(s: Status) -> Self {
        Self::Failed(s)
    }
}

/// Common adapter result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Raw status or reason code reported by the adapter ([Vol 1] Part F).
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Status(u8);

impl Status {
    /// Unspecified error.
    pub const UNSPECIFIED: Self = Self(0x1F);
    /// Remote user terminated connection.
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    /// Connection terminated by local host.
    pub const LOCAL_HOST_TERMINATED: Self = Self(0x16);
    /// Connection failed to be established.
    pub const CONNECTION_FAILED: Self = Self(0x3E);

    /// Wraps a raw status code.
    #[inline]
    #[must_use]
    pub const fn new(v: u8) -> Self {
        Self(v)
    }
}

impl From<Status> for u8 {
    #[inline]
    fn from(s: Status) -> Self {
        s.0
    }
}

impl Debug for Status {
    #[allow(clippy::use_self)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#04X})", name_of!(Status), self.0)
    }
}

impl Display for Status {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Bluetooth LE host adapter. All methods return as soon as the command is
/// accepted. Results are reported through the [`EventSender`] provided by
/// [`Adapter::attach`].
pub trait Adapter: Debug + Send + Sync {
    /// Attaches the event queue. Events sent before this call are lost. A
    /// new call replaces any previous queue.
    fn attach(&self, tx: EventSender);

    /// Powers the adapter on or off.
    fn set_active(&self, on: bool) -> Result<()>;

    /// Starts scanning. The adapter reports [`Event::AdvReport`] for each
    /// received advertisement and [`Event::ScanComplete`] once the scan
    /// duration elapses.
    fn start_scan(&self, params: &ScanParams) -> Result<()>;

    /// Stops scanning. No [`Event::ScanComplete`] is reported.
    fn stop_scan(&self) -> Result<()>;

    /// Initiates a connection. Completes with [`Event::Connected`] or
    /// [`Event::ConnectFailed`].
    fn connect(&self, addr: Addr) -> Result<()>;

    /// Terminates a connection.
    fn disconnect(&self, hdl: ConnHandle) -> Result<()>;

    /// Discovers all primary services. Reports each service with
    /// [`Event::Service`] and completes with [`Event::ServicesDone`].
    fn discover_services(&self, hdl: ConnHandle) -> Result<()>;

    /// Discovers all characteristics in the specified range. Reports each
    /// characteristic with [`Event::Characteristic`] and completes with
    /// [`Event::CharacteristicsDone`].
    fn discover_characteristics(&self, hdl: ConnHandle, range: HandleRange) -> Result<()>;

    /// Writes a characteristic value.
    fn write(&self, hdl: ConnHandle, val: Handle, data: &[u8]) -> Result<()>;

    /// Sends a characteristic value notification.
    fn notify(&self, hdl: ConnHandle, val: Handle, data: &[u8]) -> Result<()>;
}

/// Adapter event.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Event {
    AdvReport(AdvReport),
    ScanComplete,
    Connected {
        addr: Addr,
        hdl: ConnHandle,
    },
    ConnectFailed {
        addr: Addr,
        status: Status,
    },
    Disconnected {
        hdl: ConnHandle,
        reason: Status,
    },
    Service {
        hdl: ConnHandle,
        service: DiscoveredService,
    },
    ServicesDone {
        hdl: ConnHandle,
        result: std::result::Result<(), Status>,
    },
    Characteristic {
        hdl: ConnHandle,
        characteristic: DiscoveredCharacteristic,
    },
    CharacteristicsDone {
        hdl: ConnHandle,
        result: std::result::Result<(), Status>,
    },
    Value(ValueEvent),
}

/// Advertising report ([Vol 4] Part E, Section 7.7.65.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdvReport {
    pub addr: Addr,
    pub kind: AdvKind,
    /// Signal strength in dBm.
    pub rssi: i8,
    /// Raw advertising or scan response data.
    pub data: SmallVec<[u8; 31]>,
}

impl AdvReport {
    /// Creates a report, copying the advertising data.
    #[inline]
    #[must_use]
    pub fn new(addr: Addr, kind: AdvKind, rssi: i8, data: &[u8]) -> Self {
        Self {
            addr,
            kind,
            rssi,
            data: SmallVec::from_slice(data),
        }
    }

    /// Decodes the advertising data.
    #[inline]
    #[must_use]
    pub fn response_data(&self) -> ResponseData<'_> {
        ResponseData::decode(&self.data)
    }
}

/// Inbound characteristic value event kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
#[non_exhaustive]
pub enum ValueKind {
    /// Handle value notification.
    Notification,
    /// Handle value indication.
    Indication,
    /// Write response or command received from the peer.
    Write,
}

/// Inbound characteristic value event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValueEvent {
    pub hdl: ConnHandle,
    pub val: Handle,
    pub kind: ValueKind,
    pub data: Vec<u8>,
}

/// Returns a connected event queue.
#[inline]
#[must_use]
pub fn events() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (EventSender(tx), EventReceiver(rx))
}

/// Adapter side of the event queue.
#[derive(Clone, Debug)]
pub struct EventSender(mpsc::Sender<Event>);

impl EventSender {
    /// Sends an event, waiting until the previous event is consumed.
    pub async fn send(&self, evt: Event) -> Result<()> {
        self.0.send(evt).await.map_err(|_| Error::Closed)
    }

    /// Sends an event from a thread outside of the async runtime, blocking
    /// until the previous event is consumed.
    ///
    /// # Panics
    ///
    /// Panics if called from an async execution context.
    pub fn blocking_send(&self, evt: Event) -> Result<()> {
        self.0.blocking_send(evt).map_err(|_| Error::Closed)
    }

    /// Returns whether the receiver was dropped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Client side of the event queue.
#[derive(Debug)]
pub struct EventReceiver(mpsc::Receiver<Event>);

impl EventReceiver {
    /// Receives the next event or [`None`] if all senders were dropped.
    #[inline]
    pub async fn recv(&mut self) -> Option<Event> {
        self.0.recv().await
    }

    /// Polls for the next event.
    #[inline]
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.0.poll_recv(cx)
    }
}
