use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// An owned dynamically typed [`Future`] for use in cases where you can't
/// statically type your result or need to add some indirection.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Suspends current task until the next scheduler tick.
///
/// Coordinators poll external operations once per tick.
/// This future does not depend on particular executor.
pub(crate) fn next_tick() -> NextTick {
    NextTick { yielded: false }
}

pub(crate) struct NextTick {
    yielded: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            ctx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
