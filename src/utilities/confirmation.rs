use std::fmt;
use std::mem;

use crate::apis::inference::GenerationRequest;
use crate::models::ModelDescriptor;

pub const fn requires_confirmation(model: &ModelDescriptor) -> bool {
    model.nsfw
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingConfirmation,
    Submitting,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    AwaitConfirmation,
    Submit(GenerationRequest),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowError {
    /// A request is already pending or in flight.
    Busy,
    NothingToConfirm,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Busy => "a request is already in progress",
            Self::NothingToConfirm => "there is no request waiting for confirmation",
        })
    }
}

impl std::error::Error for FlowError {}

enum State {
    Idle,
    AwaitingConfirmation(GenerationRequest),
    Submitting,
}

impl State {
    const fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::AwaitingConfirmation(_) => Phase::AwaitingConfirmation,
            Self::Submitting => Phase::Submitting,
        }
    }
}

pub type PhaseObserver = Box<dyn FnMut(Phase) + Send>;

/// Per-submission state machine. At most one request is pending or in flight.
pub struct GenerationFlow {
    state: State,
    observer: Option<PhaseObserver>,
}

impl Default for GenerationFlow {
    fn default() -> Self {
        Self { state: State::Idle, observer: None }
    }
}

impl GenerationFlow {
    pub fn with_observer(observer: PhaseObserver) -> Self {
        Self { state: State::Idle, observer: Some(observer) }
    }

    pub const fn phase(&self) -> Phase {
        self.state.phase()
    }

    fn set_state(&mut self, state: State) {
        let previous = mem::replace(&mut self.state, state);
        self.notify(previous.phase());
    }

    fn notify(&mut self, previous: Phase) {
        let phase = self.state.phase();
        if previous != phase {
            log::debug!("{previous:?} -> {phase:?}");
            if let Some(observer) = &mut self.observer {
                observer(phase);
            }
        }
    }

    pub fn submit(
        &mut self,
        request: GenerationRequest,
        model: &ModelDescriptor,
    ) -> Result<Transition, FlowError> {
        if !matches!(self.state, State::Idle) {
            return Err(FlowError::Busy);
        }

        if requires_confirmation(model) {
            self.set_state(State::AwaitingConfirmation(request));
            Ok(Transition::AwaitConfirmation)
        } else {
            self.set_state(State::Submitting);
            Ok(Transition::Submit(request))
        }
    }

    pub fn confirm(&mut self) -> Result<GenerationRequest, FlowError> {
        match mem::replace(&mut self.state, State::Submitting) {
            State::AwaitingConfirmation(request) => {
                self.notify(Phase::AwaitingConfirmation);
                Ok(request)
            }
            previous => {
                self.state = previous;
                Err(FlowError::NothingToConfirm)
            }
        }
    }

    /// Drops the pending request.
    pub fn decline(&mut self) -> Result<(), FlowError> {
        if !matches!(self.state, State::AwaitingConfirmation(_)) {
            return Err(FlowError::NothingToConfirm);
        }

        self.set_state(State::Idle);
        Ok(())
    }

    pub fn finish(&mut self) {
        self.set_state(State::Idle);
    }
}
