//! # Instance mailbox.
//!
//! Each instance's lifecycle task is the single consumer of a bounded queue of
//! [`Command`]s. Everything that must touch the engine (route dispatch, job
//! ticks, native callbacks) goes through it, so the engine only ever runs on one
//! task.
//!
//! [`InstanceControl`] is the public, cloneable producer side handed to engines
//! and native modules.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::engine::script::{RouteRequest, RouteResponse, ScriptEngine};
use crate::error::EngineError;

/// Work executed against the engine on the lifecycle task.
pub type EngineCallback =
    Box<dyn for<'e> FnOnce(&'e mut dyn ScriptEngine) -> BoxFuture<'e, ()> + Send + 'static>;

/// What the lifecycle task answers to a route command.
#[derive(Debug)]
pub(crate) enum RouteOutcome {
    /// The handler returned; `None` means no route matched.
    Answered(Result<Option<RouteResponse>, EngineError>),
    /// The handler was abandoned after the route timeout.
    TimedOut(Duration),
}

pub(crate) type RouteReply = oneshot::Sender<RouteOutcome>;

pub(crate) enum Command {
    Route {
        request: RouteRequest,
        reply: RouteReply,
    },
    Job {
        name: String,
    },
    Post(EngineCallback),
    Finish {
        reason: String,
    },
    Fault {
        message: String,
    },
}

/// The mailbox is gone: the instance has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("instance is no longer running")]
pub struct InstanceGone;

/// Producer handle of an instance mailbox.
#[derive(Clone, Debug)]
pub struct InstanceControl {
    tx: mpsc::Sender<Command>,
}

impl InstanceControl {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Runs `callback` against the engine on the lifecycle task.
    ///
    /// Waits for queue space; fails once the instance has ended.
    pub async fn post(&self, callback: EngineCallback) -> Result<(), InstanceGone> {
        self.send(Command::Post(callback)).await
    }

    /// Ends the run gracefully (the script chose to exit). No restart follows.
    pub async fn finish(&self, reason: impl Into<String>) -> Result<(), InstanceGone> {
        self.send(Command::Finish {
            reason: reason.into(),
        })
        .await
    }

    /// Reports an unhandled asynchronous error; ends the run as a fault.
    pub async fn fault(&self, message: impl Into<String>) -> Result<(), InstanceGone> {
        self.send(Command::Fault {
            message: message.into(),
        })
        .await
    }

    /// True once the lifecycle task has stopped consuming.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn send(&self, cmd: Command) -> Result<(), InstanceGone> {
        self.tx.send(cmd).await.map_err(|_| InstanceGone)
    }

    /// Non-waiting enqueue used by job tickers: a full mailbox skips the tick.
    pub(crate) fn try_send(&self, cmd: Command) -> Result<(), mpsc::error::TrySendError<()>> {
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => mpsc::error::TrySendError::Full(()),
            mpsc::error::TrySendError::Closed(_) => mpsc::error::TrySendError::Closed(()),
        })
    }
}
