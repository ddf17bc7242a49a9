//! Session state cell

use tokio::sync::watch;

use mkb_core::SessionState;

/// Current session state, observable through watch receivers
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move `from → to`; false if the state was not `from`
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Enter shutdown, returning the state shutdown started from.
    ///
    /// `Idle` has nothing to tear down and goes straight to `Closed`.
    pub(crate) fn begin_close(&self) -> SessionState {
        let mut previous = SessionState::Idle;
        self.tx.send_if_modified(|state| {
            previous = *state;
            match *state {
                SessionState::Idle => {
                    *state = SessionState::Closed;
                    true
                }
                SessionState::Connecting | SessionState::Open => {
                    *state = SessionState::Closing;
                    true
                }
                SessionState::Closing | SessionState::Closed => false,
            }
        });
        previous
    }

    pub(crate) fn set_closed(&self) {
        self.tx.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
    }
}
