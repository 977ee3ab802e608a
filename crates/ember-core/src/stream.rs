// ── Status streams ──
//
// Thin adapter exposing a widget's `watch`-published status as a
// `Stream`, so UI layers can consume updates with combinators instead
// of hand-rolled change loops.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

use crate::automation::WidgetStatus;

/// Stream of status updates for one running widget task.
///
/// Yields the current value immediately, then every change. Ends when
/// the widget's task is stopped (sender dropped).
pub struct StatusStream {
    inner: WatchStream<WidgetStatus>,
}

impl StatusStream {
    pub fn new(rx: watch::Receiver<WidgetStatus>) -> Self {
        Self {
            inner: WatchStream::new(rx),
        }
    }
}

impl From<watch::Receiver<WidgetStatus>> for StatusStream {
    fn from(rx: watch::Receiver<WidgetStatus>) -> Self {
        Self::new(rx)
    }
}

impl Stream for StatusStream {
    type Item = WidgetStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
