//! Answer stream: incremental delivery of generated fragments
//!
//! Wraps a backend [`FragmentStream`] with three guarantees:
//! - fragments are forwarded as soon as the backend yields them;
//! - the first backend error becomes one terminal diagnostic fragment, after
//!   which the stream ends and stays ended;
//! - dropping or closing the stream drops the backend stream, so no further
//!   backend work is driven.

use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::providers::FragmentStream;
use crate::types::AnswerFragment;

/// Pull-based stream of [`AnswerFragment`]s
pub struct AnswerStream {
    /// Backend stream; `None` once finished, failed or closed
    inner: Option<FragmentStream>,
    /// Number of fragments handed to the consumer
    yielded: usize,
    /// Whether the stream ended with a diagnostic
    degraded: bool,
}

impl AnswerStream {
    /// Wrap a backend stream
    pub fn new(inner: FragmentStream) -> Self {
        Self {
            inner: Some(inner),
            yielded: 0,
            degraded: false,
        }
    }

    /// A stream that yields exactly one fixed text fragment
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(stream::once(async move { Ok(text) }).boxed())
    }

    /// Pull the next fragment
    pub async fn next_fragment(&mut self) -> Option<AnswerFragment> {
        self.next().await
    }

    /// Stop generation; later pulls return `None`
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("Answer stream closed after {} fragments", self.yielded);
        }
    }

    /// Whether no more fragments will be produced
    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether generation failed and a diagnostic was emitted
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Fragments handed out so far
    pub fn fragments_yielded(&self) -> usize {
        self.yielded
    }

    /// Drain the stream into the full answer text
    pub async fn collect_text(mut self) -> (String, bool) {
        let mut answer = String::new();
        while let Some(fragment) = self.next_fragment().await {
            answer.push_str(fragment.as_str());
        }
        (answer, self.degraded)
    }
}

impl Stream for AnswerStream {
    type Item = AnswerFragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let polled = match this.inner.as_mut() {
                Some(inner) => inner.poll_next_unpin(cx),
                None => return Poll::Ready(None),
            };

            match polled {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    this.yielded += 1;
                    return Poll::Ready(Some(AnswerFragment::Text(text)));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(
                        "Generation failed after {} fragments: {}",
                        this.yielded,
                        e
                    );
                    this.inner = None;
                    this.degraded = true;
                    this.yielded += 1;
                    return Poll::Ready(Some(AnswerFragment::Diagnostic(format!(
                        "\n\n[Error: {}]",
                        e
                    ))));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
