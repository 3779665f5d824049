//! Scan sessions.

use std::fmt::{Debug, Formatter};
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::{debug, warn};

use crate::dev::Device;
use crate::host::Event;
use crate::{Client, Result};

type Filter<'a> = Box<dyn FnMut(&Device) -> bool + Send + 'a>;

/// Finite sequence of devices produced by an active scan. The sequence ends
/// when the adapter reports scan completion, when [`Scan::stop`] is called,
/// or when the adapter closes the event queue. Dropping an unfinished scan
/// stops the adapter scan.
pub struct Scan<'a> {
    client: &'a mut Client,
    filter: Option<Filter<'a>>,
    done: bool,
}

impl<'a> Scan<'a> {
    #[inline]
    pub(crate) fn new(client: &'a mut Client) -> Self {
        Self {
            client,
            filter: None,
            done: false,
        }
    }

    /// Skips devices for which `f` returns `false`.
    #[must_use]
    pub fn filter(mut self, f: impl FnMut(&Device) -> bool + Send + 'a) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    /// Returns the next device or [`None`] once the scan is finished.
    pub async fn next(&mut self) -> Option<Device> {
        poll_fn(|cx| self.poll_device(cx)).await
    }

    /// Stops the adapter scan and ends the sequence. Devices produced so far
    /// remain valid.
    pub fn stop(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        debug!("Stopping scan");
        Ok(self.client.adapter().stop_scan()?)
    }

    /// Returns whether the sequence has ended.
    #[inline(always)]
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    fn poll_device(&mut self, cx: &mut Context<'_>) -> Poll<Option<Device>> {
        while !self.done {
            let evt = match self.client.poll_event(cx) {
                Poll::Ready(Some(evt)) => evt,
                Poll::Ready(None) => {
                    debug!("Event queue closed during scan");
                    self.done = true;
                    break;
                }
                Poll::Pending => return Poll::Pending,
            };
            match evt {
                Event::AdvReport(r) => {
                    let dev = Device::new(&r);
                    if self.filter.as_mut().map_or(true, |f| f(&dev)) {
                        return Poll::Ready(Some(dev));
                    }
                }
                Event::ScanComplete => {
                    debug!("Scan complete");
                    self.done = true;
                }
                evt => self.client.dispatch(evt),
            }
        }
        Poll::Ready(None)
    }
}

impl futures_core::Stream for Scan<'_> {
    type Item = Device;

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_device(cx)
    }
}

impl futures_core::FusedStream for Scan<'_> {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Debug for Scan<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("filter", &self.filter.is_some())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Drop for Scan<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop scan: {e}");
        }
    }
}
