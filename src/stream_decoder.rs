//! Frame decoding for streamed action responses
//!
//! The function server answers a streaming call with newline-delimited UTF-8
//! JSON objects of the form `{partial?, final?, error?}`. Every read must hold
//! complete objects; a frame split across two reads is a parse error.

use crate::action::ActionError;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Raw byte stream returned by a streaming action call
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ActionError>>;

/// One decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<P, F> {
    Partial(P),
    Final(F),
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "P: DeserializeOwned, F: DeserializeOwned"))]
struct WireFrame<P, F> {
    #[serde(default)]
    partial: Option<P>,
    #[serde(rename = "final", default)]
    final_value: Option<F>,
    #[serde(default)]
    error: Option<Value>,
}

/// Pulls frames out of a [`ByteStream`].
///
/// The sequence ends after the first `final` frame, the first error, or the
/// end of the underlying stream, whichever comes first. The stream is dropped
/// at that point so the connection is released on every exit path.
pub struct StreamDecoder<P, F> {
    reader: Option<ByteStream>,
    pending: VecDeque<Result<Frame<P, F>, ActionError>>,
}

impl<P, F> StreamDecoder<P, F>
where
    P: DeserializeOwned,
    F: DeserializeOwned,
{
    pub fn new(stream: ByteStream) -> Self {
        Self {
            reader: Some(stream),
            pending: VecDeque::new(),
        }
    }

    /// Whether the underlying stream has been released
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.reader.is_none() && self.pending.is_empty()
    }

    /// Next frame, or `None` once the sequence has terminated
    pub async fn next_frame(&mut self) -> Option<Result<Frame<P, F>, ActionError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                if !matches!(item, Ok(Frame::Partial(_))) {
                    self.finish();
                }
                return Some(item);
            }

            let reader = self.reader.as_mut()?;
            match reader.next().await {
                None => {
                    self.finish();
                    return None;
                }
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(e));
                }
                Some(Ok(bytes)) => self.push_chunk(&bytes),
            }
        }
    }

    fn finish(&mut self) {
        self.reader = None;
        self.pending.clear();
    }

    fn push_chunk(&mut self, bytes: &[u8]) {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                self.pending
                    .push_back(Err(ActionError::parse(format!("invalid UTF-8 in stream: {e}"))));
                return;
            }
        };

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<WireFrame<P, F>>(line) {
                Ok(wire) => self.queue_wire(wire),
                Err(e) => {
                    tracing::debug!(error = %e, frame = %line, "Malformed stream frame");
                    self.pending
                        .push_back(Err(ActionError::parse(format!("malformed stream frame: {e}"))));
                    return;
                }
            }
        }
    }

    fn queue_wire(&mut self, wire: WireFrame<P, F>) {
        if let Some(error) = wire.error {
            self.pending.push_back(Err(ActionError::from_wire(&error)));
            return;
        }
        if let Some(partial) = wire.partial {
            self.pending.push_back(Ok(Frame::Partial(partial)));
        }
        if let Some(final_value) = wire.final_value {
            self.pending.push_back(Ok(Frame::Final(final_value)));
        }
    }
}
