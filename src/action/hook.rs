//! Invocation hook for a single model function
//!
//! An `ActionHook` owns the turn state of one function. `claim` starts an
//! invocation and `run` dispatches it, feeds decoded frames through
//! `transition`, and delivers the resulting callbacks to the observer before
//! the terminal state is returned to the caller. Claiming cancels the
//! invocation it supersedes, and frames from a superseded call never touch
//! the shared state. A later claim wins even if the earlier one has not
//! started running yet.

use super::args::prepare_args;
use super::{ActionCall, ActionClient, ActionError, ModelFunction};
use crate::stream_decoder::{Frame, StreamDecoder};
use crate::turn::{transition, TurnEffect, TurnEvent, TurnState, TurnStatus};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Receives turn callbacks in frame arrival order. Every method is optional.
pub trait TurnObserver<P, F>: Send {
    fn on_stream_data(&mut self, _partial: &P) {}
    fn on_final_data(&mut self, _final_data: &F) {}
    fn on_data(&mut self, _data: &Frame<P, F>) {}
    fn on_error(&mut self, _error: &ActionError) {}
}

impl<P, F> TurnObserver<P, F> for () {}

/// Snapshot of a hook, shaped for rendering
#[derive(Debug, Clone)]
pub struct HookView<P, F> {
    pub status: TurnStatus,
    /// Stream data while streaming, otherwise final data
    pub data: Option<Frame<P, F>>,
    pub final_data: Option<F>,
    /// Always `None` when streaming was not requested
    pub stream_data: Option<P>,
    pub error: Option<ActionError>,
}

impl<P, F> HookView<P, F> {
    pub fn is_pending(&self) -> bool {
        self.status == TurnStatus::Pending
    }

    pub fn is_streaming(&self) -> bool {
        self.status == TurnStatus::Streaming
    }

    pub fn is_success(&self) -> bool {
        self.status == TurnStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == TurnStatus::Error
    }

    pub fn is_loading(&self) -> bool {
        self.is_pending() || self.is_streaming()
    }
}

struct Invocation {
    generation: u64,
    cancel: CancellationToken,
}

/// A claimed invocation, redeemed by `ActionHook::run`
#[must_use]
#[derive(Debug)]
pub struct Ticket {
    generation: u64,
    cancel: CancellationToken,
}

pub struct ActionHook<A: ModelFunction> {
    client: Arc<dyn ActionClient>,
    streaming: bool,
    state_tx: watch::Sender<TurnState<A::Partial, A::Final>>,
    current: Mutex<Invocation>,
}

impl<A: ModelFunction> ActionHook<A> {
    pub fn new(client: Arc<dyn ActionClient>, streaming: bool) -> Self {
        let (state_tx, _) = watch::channel(TurnState::Idle);
        Self {
            client,
            streaming,
            state_tx,
            current: Mutex::new(Invocation {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Receive every state change, for re-rendering
    pub fn subscribe(&self) -> watch::Receiver<TurnState<A::Partial, A::Final>> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> TurnState<A::Partial, A::Final> {
        self.state_tx.borrow().clone()
    }

    pub fn status(&self) -> TurnStatus {
        self.state_tx.borrow().observed_status(self.streaming)
    }

    pub fn view(&self) -> HookView<A::Partial, A::Final> {
        let state = self.state_tx.borrow();
        let stream_data = if self.streaming {
            state.stream_data().cloned()
        } else {
            None
        };
        let final_data = state.final_data().cloned();
        let data = match (&*state, &stream_data) {
            (TurnState::Streaming { .. }, Some(partial)) => Some(Frame::Partial(partial.clone())),
            _ => final_data.clone().map(Frame::Final),
        };
        HookView {
            status: state.observed_status(self.streaming),
            data,
            final_data,
            stream_data,
            error: state.error().cloned(),
        }
    }

    /// Abandon any in-flight call and return to idle
    pub fn reset(&self) {
        let generation = self.supersede().0;
        self.apply(generation, TurnEvent::Reset, &mut ());
    }

    /// Claim and run one invocation
    #[cfg(test)]
    pub async fn mutate<O>(
        &self,
        args: A::Args,
        observer: &mut O,
    ) -> Result<A::Final, ActionError>
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        let ticket = self.claim();
        self.run(ticket, args, observer).await
    }

    /// Supersede any in-flight call and move to pending
    pub fn claim(&self) -> Ticket {
        let (generation, cancel) = self.supersede();
        self.apply(generation, TurnEvent::Start, &mut ());
        Ticket { generation, cancel }
    }

    /// Dispatch a claimed invocation.
    ///
    /// Failures are recorded in the turn state, reported to `on_error`, and
    /// also returned here. A call superseded by a newer one returns a
    /// `Cancelled` error without touching state or observer; if that happened
    /// before dispatch, the client is never contacted.
    pub async fn run<O>(
        &self,
        ticket: Ticket,
        args: A::Args,
        observer: &mut O,
    ) -> Result<A::Final, ActionError>
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        let Ticket { generation, cancel } = ticket;
        if cancel.is_cancelled() {
            tracing::debug!(function = A::NAME, generation, "Claim superseded before dispatch");
            return Err(ActionError::cancelled());
        }

        let call = match A::into_args(args) {
            Ok(args) => ActionCall::new::<A>(prepare_args(args)),
            Err(e) => return Err(self.fail(generation, e, observer)),
        };

        tracing::debug!(
            function = A::NAME,
            generation,
            streaming = self.streaming,
            "Dispatching action"
        );

        if self.streaming {
            self.run_streaming(generation, &cancel, &call, observer).await
        } else {
            self.run_once(generation, &cancel, &call, observer).await
        }
    }

    async fn run_once<O>(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        call: &ActionCall,
        observer: &mut O,
    ) -> Result<A::Final, ActionError>
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ActionError::cancelled()),
            result = self.client.call(call) => result,
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(self.fail(generation, e, observer)),
        };

        match serde_json::from_value::<A::Final>(value) {
            Ok(final_data) => {
                self.apply(generation, TurnEvent::Final(final_data.clone()), observer);
                Ok(final_data)
            }
            Err(e) => {
                let err = ActionError::parse(format!("unexpected {} result: {e}", A::NAME));
                Err(self.fail(generation, err, observer))
            }
        }
    }

    async fn run_streaming<O>(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        call: &ActionCall,
        observer: &mut O,
    ) -> Result<A::Final, ActionError>
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ActionError::cancelled()),
            opened = self.client.stream(call) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(generation, e, observer)),
        };

        let mut decoder = StreamDecoder::<A::Partial, A::Final>::new(stream);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(
                        function = A::NAME,
                        generation,
                        "Invocation superseded, releasing stream"
                    );
                    return Err(ActionError::cancelled());
                }
                next = decoder.next_frame() => next,
            };

            match next {
                Some(Ok(Frame::Partial(partial))) => {
                    self.apply(generation, TurnEvent::Partial(partial), observer);
                }
                Some(Ok(Frame::Final(final_data))) => {
                    self.apply(generation, TurnEvent::Final(final_data.clone()), observer);
                    return Ok(final_data);
                }
                Some(Err(e)) => return Err(self.fail(generation, e, observer)),
                None => return Err(self.fail(generation, ActionError::incomplete(), observer)),
            }
        }
    }

    /// Cancel the current invocation and claim a new generation
    fn supersede(&self) -> (u64, CancellationToken) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel.cancel();
        current.generation += 1;
        current.cancel = CancellationToken::new();
        (current.generation, current.cancel.clone())
    }

    fn fail<O>(&self, generation: u64, error: ActionError, observer: &mut O) -> ActionError
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        tracing::warn!(
            function = A::NAME,
            generation,
            error = %error,
            kind = ?error.kind,
            "Action invocation failed"
        );
        self.apply(generation, TurnEvent::Failed(error.clone()), observer);
        error
    }

    /// Apply an event if `generation` is still current, then deliver callbacks
    fn apply<O>(
        &self,
        generation: u64,
        event: TurnEvent<A::Partial, A::Final>,
        observer: &mut O,
    ) -> bool
    where
        O: TurnObserver<A::Partial, A::Final> + ?Sized,
    {
        let effects = {
            let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.generation != generation {
                tracing::debug!(
                    function = A::NAME,
                    generation,
                    "Dropping event from superseded invocation"
                );
                return false;
            }
            let result = transition(&self.state_tx.borrow(), event);
            match result {
                Ok(result) => {
                    self.state_tx.send_replace(result.new_state);
                    result.effects
                }
                Err(e) => {
                    tracing::debug!(function = A::NAME, generation, error = %e, "Ignoring event");
                    return false;
                }
            }
        };

        for effect in effects {
            match effect {
                TurnEffect::StreamData(partial) => observer.on_stream_data(&partial),
                TurnEffect::FinalData(final_data) => observer.on_final_data(&final_data),
                TurnEffect::Data(frame) => observer.on_data(&frame),
                TurnEffect::Error(error) => observer.on_error(&error),
            }
        }
        true
    }
}
