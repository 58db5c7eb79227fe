//! Helpers shared by the unit tests.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, Waker};

/// Poll `f` once and return its output.
///
/// Every mock in this crate completes immediately, so `Pending` is a bug.
pub fn block_on<F: Future>(f: F) -> F::Output {
    let mut f = pin!(f);
    let mut cx = Context::from_waker(Waker::noop());

    match f.as_mut().poll(&mut cx) {
        Poll::Ready(output) => output,
        Poll::Pending => panic!("mock future stalled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_returns_ready_output() {
        assert_eq!(block_on(async { 6 * 7 }), 42);
    }

    #[test]
    #[should_panic(expected = "mock future stalled")]
    fn test_block_on_rejects_pending() {
        block_on(core::future::pending::<()>());
    }
}
