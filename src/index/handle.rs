//! Lazily-opened backend connection with an explicit lifecycle.

use crate::error::{DbError, Result};

use std::future::Future;
use tokio::sync::Mutex;

enum State<T> {
    Unopened,
    Open(T),
    Closed,
}

/// Holds one backend connection through `unopened -> open -> closed`.
///
/// The connection is opened on first use. Closing is terminal: later
/// operations fail with [`DbError::Closed`] instead of silently reopening.
pub struct Handle<T> {
    name: &'static str,
    state: Mutex<State<T>>,
}

impl<T: Clone> Handle<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::Unopened),
        }
    }

    /// Return the open connection, running `open` first if needed.
    ///
    /// The lock is held while opening, so concurrent first callers open once.
    pub async fn get_or_open<F, Fut>(&self, open: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = self.state.lock().await;
        match &*state {
            State::Open(connection) => Ok(connection.clone()),
            State::Closed => Err(DbError::Closed(self.name).into()),
            State::Unopened => {
                let connection = open().await?;
                tracing::debug!(index = self.name, "index opened");
                *state = State::Open(connection.clone());
                Ok(connection)
            }
        }
    }

    /// Mark the handle closed, returning the connection if it was open so the
    /// caller can release it. Repeated calls return `None`.
    pub async fn close(&self) -> Option<T> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, State::Closed) {
            State::Open(connection) => {
                tracing::debug!(index = self.name, "index closed");
                Some(connection)
            }
            State::Unopened | State::Closed => None,
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(*self.state.lock().await, State::Open(_))
    }
}
