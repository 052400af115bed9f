//! Single-resolution promise used for page downstream rendezvous.
//!
//! A [`SettableFuture`] is resolved at most once. Any number of
//! [`SharedValue`] handles can wait on it; they all observe the same value.
//! Resolving only wakes waiting tasks, it never runs their continuations on
//! the resolving thread.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

/// Returned by a [`SharedValue`] whose promise was dropped or abandoned unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

impl fmt::Display for Abandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise abandoned before a value was set")
    }
}

impl std::error::Error for Abandoned {}

pub struct SettableFuture<T: Clone> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
    shared: Shared<oneshot::Receiver<T>>,
}

impl<T: Clone> SettableFuture<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            shared: rx.shared(),
        }
    }

    /// Resolves the promise. Returns `false` if it was already set or abandoned.
    pub fn set(&self, value: T) -> bool {
        let sender = self.sender.lock().take();
        match sender {
            // the receiver lives in `self.shared`, so send cannot fail here
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Fails every waiter with [`Abandoned`]. Returns `false` if already completed.
    pub fn abandon(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn future(&self) -> SharedValue<T> {
        SharedValue {
            inner: self.shared.clone(),
        }
    }
}

impl<T: Clone> Default for SettableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for SettableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettableFuture")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Cloneable handle on a [`SettableFuture`]'s eventual value.
#[derive(Clone)]
pub struct SharedValue<T: Clone> {
    inner: Shared<oneshot::Receiver<T>>,
}

impl<T: Clone> SharedValue<T> {
    /// True when both handles wait on the same promise.
    pub fn same_as(&self, other: &SharedValue<T>) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<T: Clone> Future for SharedValue<T> {
    type Output = Result<T, Abandoned>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .inner
            .poll_unpin(cx)
            .map(|r| r.map_err(|_| Abandoned))
    }
}

impl<T: Clone> fmt::Debug for SharedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedValue").finish_non_exhaustive()
    }
}
