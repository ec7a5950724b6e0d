use {
    crate::Error,
    parking_lot::Mutex,
    slab::Slab,
    std::{
        fmt::{self, Debug},
        future::Future,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll, Waker},
    },
};

const WAKER_INDEX_NULL: usize = usize::MAX;

/// Terminal result of a coordinated operation.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(Error),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> SignalState {
        match self {
            Outcome::Succeeded(_) => SignalState::Succeeded,
            Outcome::Failed(_) => SignalState::Failed,
            Outcome::Canceled => SignalState::Canceled,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    /// Converts outcome into `Result`, mapping cancellation to [`Error::Canceled`].
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
            Outcome::Canceled => Err(Error::Canceled),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    wakers: Slab<Waker>,
}

/// One-shot signal that is settled at most once.
///
/// Clones share the same state.
/// The first `try_*` call wins, all later calls are no-ops.
/// Any number of tasks may wait on the signal,
/// all of them are woken when it settles.
pub struct CompletionSignal<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for CompletionSignal<T> {
    fn clone(&self) -> Self {
        CompletionSignal {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for CompletionSignal<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CompletionSignal")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionSignal<T> {
    /// Returns new pending signal.
    pub fn new() -> Self {
        CompletionSignal {
            inner: Arc::new(Mutex::new(Inner {
                outcome: None,
                wakers: Slab::new(),
            })),
        }
    }

    /// Returns signal that is already canceled.
    pub fn canceled() -> Self {
        let signal = Self::new();
        signal.try_cancel();
        signal
    }

    pub fn try_succeed(&self, value: T) -> bool {
        self.try_settle(Outcome::Succeeded(value))
    }

    pub fn try_fail(&self, error: Error) -> bool {
        self.try_settle(Outcome::Failed(error))
    }

    pub fn try_cancel(&self) -> bool {
        self.try_settle(Outcome::Canceled)
    }

    fn try_settle(&self, outcome: Outcome<T>) -> bool {
        let wakers = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome);
            std::mem::replace(&mut inner.wakers, Slab::new())
        };

        // Wake everyone
        for (_, waker) in wakers {
            waker.wake();
        }
        true
    }

    pub fn state(&self) -> SignalState {
        match &self.inner.lock().outcome {
            None => SignalState::Pending,
            Some(outcome) => outcome.state(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().outcome.is_some()
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == SignalState::Canceled
    }

    /// Returns `true` if both signals share the same state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns future that resolves once signal is settled.
    pub fn wait(&self) -> Wait<T> {
        Wait {
            inner: self.inner.clone(),
            waker_index: WAKER_INDEX_NULL,
        }
    }
}

impl<T> CompletionSignal<T>
where
    T: Clone,
{
    /// Returns settled outcome without waiting.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.lock().outcome.clone()
    }
}

/// Future returned by [`CompletionSignal::wait`].
pub struct Wait<T> {
    inner: Arc<Mutex<Inner<T>>>,
    waker_index: usize,
}

impl<T> Unpin for Wait<T> {}

impl<T> Future for Wait<T>
where
    T: Clone,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Outcome<T>> {
        let me = self.get_mut();
        let mut inner = me.inner.lock();

        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone());
        }

        let waker = ctx.waker().clone();
        if me.waker_index == WAKER_INDEX_NULL || !inner.wakers.contains(me.waker_index) {
            me.waker_index = inner.wakers.insert(waker);
        } else {
            inner.wakers[me.waker_index] = waker;
        }
        Poll::Pending
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if self.waker_index != WAKER_INDEX_NULL {
            let mut inner = self.inner.lock();
            if inner.outcome.is_none() && inner.wakers.contains(self.waker_index) {
                inner.wakers.remove(self.waker_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        futures_util::future::{join, FutureExt as _},
    };

    #[test]
    fn first_settle_wins() {
        let signal = CompletionSignal::new();
        assert_eq!(signal.state(), SignalState::Pending);

        assert!(signal.try_succeed(1));
        assert!(!signal.try_succeed(2));
        assert!(!signal.try_fail(Error::InvalidKey));
        assert!(!signal.try_cancel());

        match signal.outcome() {
            Some(Outcome::Succeeded(1)) => {}
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn canceled_constructor() {
        let signal = CompletionSignal::<()>::canceled();
        assert!(signal.is_settled());
        assert!(signal.is_canceled());
        assert!(signal.wait().now_or_never().unwrap().is_canceled());
    }

    #[test]
    fn pending_wait_does_not_resolve() {
        let signal = CompletionSignal::<u32>::new();
        assert!(signal.wait().now_or_never().is_none());
        assert!(signal.inner.lock().wakers.is_empty());
    }

    #[tokio::test]
    async fn all_waiters_observe_same_outcome() {
        let signal = CompletionSignal::<u32>::new();
        let first = signal.wait();
        let second = signal.clone().wait();

        let settle = {
            let signal = signal.clone();
            async move {
                tokio::task::yield_now().await;
                signal.try_fail(Error::Canceled);
            }
        };

        let ((a, b), ()) = join(join(first, second), settle).await;
        assert_eq!(a.state(), SignalState::Failed);
        assert_eq!(b.state(), SignalState::Failed);
        assert_eq!(signal.state(), SignalState::Failed);
    }

    #[test]
    fn clones_share_state() {
        let signal = CompletionSignal::<()>::new();
        let clone = signal.clone();
        assert!(signal.ptr_eq(&clone));
        assert!(!signal.ptr_eq(&CompletionSignal::new()));

        clone.try_cancel();
        assert!(signal.is_canceled());
    }
}
