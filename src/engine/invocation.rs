//! Pending invocations and their single-completion guarantee.
//!
//! Every submitted request gets one result cell. The exchange, the deadline timer, and the
//! caller's [`cancel`](PendingInvocation::cancel) all race to settle it; an atomic
//! compare-and-set decides the winner, and every later attempt is a no-op. The winner aborts
//! the other tasks tied to the invocation.
//!
//! The caller observes the cell through exactly one view, because each view consumes the
//! [`PendingInvocation`]:
//!
//! - [`wait`](PendingInvocation::wait) parks the calling thread on a condition variable the
//!   event loop signals once,
//! - awaiting it as a [`Future`],
//! - [`on_complete`](PendingInvocation::on_complete) with an [`InvocationCallback`].

use crate::error::{ProcessingError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Receives the outcome of an invocation, at most once.
///
/// Callbacks run on the engine's event loop and must not block.
pub trait InvocationCallback<T>: Send + 'static {
    /// The invocation succeeded.
    fn completed(self, value: T);
    /// The invocation failed.
    fn failed(self, error: ProcessingError);
}

/// Callback built from two closures; see [`callback`].
pub struct FnCallback<S, F> {
    on_success: S,
    on_failure: F,
}

/// Build an [`InvocationCallback`] from a success and a failure closure.
///
/// ```
/// use rest_engine_http::callback;
///
/// let cb = callback(
///     |body: String| println!("got {body}"),
///     |err| eprintln!("failed: {err}"),
/// );
/// # let _ = cb;
/// ```
pub fn callback<T, S, F>(on_success: S, on_failure: F) -> FnCallback<S, F>
where
    S: FnOnce(T) + Send + 'static,
    F: FnOnce(ProcessingError) + Send + 'static,
{
    FnCallback {
        on_success,
        on_failure,
    }
}

impl<T, S, F> InvocationCallback<T> for FnCallback<S, F>
where
    S: FnOnce(T) + Send + 'static,
    F: FnOnce(ProcessingError) + Send + 'static,
{
    fn completed(self, value: T) {
        (self.on_success)(value)
    }

    fn failed(self, error: ProcessingError) {
        (self.on_failure)(error)
    }
}

/// Which party settled (or tried to settle) an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Exchange,
    Timer,
    Caller,
}

type Deliver<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum State<T> {
    Pending {
        waker: Option<Waker>,
        deliver: Option<Deliver<T>>,
    },
    Ready(Result<T>),
    Delivered,
}

struct Cell<T> {
    claimed: AtomicBool,
    state: Mutex<State<T>>,
    ready: Condvar,
    tasks: Mutex<Vec<(Origin, AbortHandle)>>,
}

/// Engine-side handle that settles an invocation.
pub(crate) struct Settler<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Settler {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Settler<T> {
    /// Claim the terminal transition. Returns `false`, dropping `result`, if another party
    /// already claimed it.
    pub(crate) fn settle(&self, origin: Origin, result: Result<T>) -> bool {
        if self
            .cell
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let losers: Vec<_> = std::mem::take(&mut *self.cell.tasks.lock());
        for (task_origin, task) in losers {
            if task_origin != origin {
                task.abort();
            }
        }

        let mut state = self.cell.state.lock();
        match std::mem::replace(&mut *state, State::Delivered) {
            State::Pending {
                deliver: Some(deliver),
                ..
            } => {
                drop(state);
                deliver(result);
            }
            State::Pending {
                waker,
                deliver: None,
            } => {
                *state = State::Ready(result);
                drop(state);
                self.cell.ready.notify_all();
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            // Unreachable while the claim flag guards the cell.
            other => *state = other,
        }
        true
    }

    /// Tie a task to the invocation so the winning party can abort it.
    pub(crate) fn attach(&self, origin: Origin, task: AbortHandle) {
        let mut tasks = self.cell.tasks.lock();
        if self.cell.claimed.load(Ordering::Acquire) {
            drop(tasks);
            task.abort();
            return;
        }
        tasks.push((origin, task));
    }
}

/// Create a pending invocation and the settler that completes it.
pub(crate) fn pending<T>(id: Uuid) -> (PendingInvocation<T>, Settler<T>) {
    let cell = Arc::new(Cell {
        claimed: AtomicBool::new(false),
        state: Mutex::new(State::Pending {
            waker: None,
            deliver: None,
        }),
        ready: Condvar::new(),
        tasks: Mutex::new(Vec::new()),
    });
    (
        PendingInvocation {
            id,
            deadline: None,
            cell: Arc::clone(&cell),
        },
        Settler { cell },
    )
}

/// An in-flight request and its eventual outcome.
///
/// Dropping a `PendingInvocation` does not cancel the request; its result is discarded (and a
/// response released) when it arrives. Call [`cancel`](Self::cancel) to stop it.
#[must_use = "a pending invocation does nothing observable unless waited on, awaited, or given a callback"]
pub struct PendingInvocation<T> {
    id: Uuid,
    deadline: Option<Instant>,
    cell: Arc<Cell<T>>,
}

impl<T> fmt::Debug for PendingInvocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> PendingInvocation<T> {
    /// Invocation id, also recorded on the invocation's tracing span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the request deadline fires, or `None` if the request has no deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Whether the terminal transition has happened.
    pub fn is_done(&self) -> bool {
        self.cell.claimed.load(Ordering::Acquire)
    }

    /// Cancel the invocation. Returns `false` if it had already completed.
    ///
    /// A cancelled invocation fails with [`FailureKind::Cancelled`](crate::FailureKind::Cancelled)
    /// and its exchange is aborted.
    pub fn cancel(&self) -> bool {
        let settler = Settler {
            cell: Arc::clone(&self.cell),
        };
        let cancelled = settler.settle(
            Origin::Caller,
            Err(ProcessingError::new(
                crate::FailureKind::Cancelled,
                "invocation cancelled by caller",
            )),
        );
        if cancelled {
            tracing::debug!(id = %self.id, "invocation cancelled");
        }
        cancelled
    }

    /// Block the calling thread until the outcome is available.
    ///
    /// Must not be called from an async task on the engine's runtime.
    pub fn wait(self) -> Result<T> {
        let mut state = self.cell.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Delivered) {
                State::Ready(result) => return result,
                pending @ State::Pending { .. } => {
                    *state = pending;
                    self.cell.ready.wait(&mut state);
                }
                State::Delivered => {
                    return Err(ProcessingError::internal("invocation outcome already taken"))
                }
            }
        }
    }

    /// Block for at most `timeout`. Gives the invocation back if it is still pending.
    ///
    /// Unlike a request deadline, expiry here does not fail or cancel the invocation.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        let until = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Delivered) {
                State::Ready(result) => return Ok(result),
                pending @ State::Pending { .. } => {
                    *state = pending;
                    if self.cell.ready.wait_until(&mut state, until).timed_out() {
                        if let State::Ready(_) = &*state {
                            continue;
                        }
                        drop(state);
                        return Err(self);
                    }
                }
                State::Delivered => {
                    return Ok(Err(ProcessingError::internal(
                        "invocation outcome already taken",
                    )))
                }
            }
        }
    }

    /// Deliver the outcome to `callback` instead of waiting for it.
    pub fn on_complete<C>(self, callback: C)
    where
        C: InvocationCallback<T>,
        T: 'static,
    {
        let deliver: Deliver<T> = Box::new(move |result| match result {
            Ok(value) => callback.completed(value),
            Err(err) => callback.failed(err),
        });
        let mut state = self.cell.state.lock();
        match std::mem::replace(&mut *state, State::Delivered) {
            State::Ready(result) => {
                drop(state);
                deliver(result);
            }
            State::Pending { waker, .. } => {
                *state = State::Pending {
                    waker,
                    deliver: Some(deliver),
                };
            }
            State::Delivered => {}
        }
    }
}

impl<T> Future for PendingInvocation<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.state.lock();
        match std::mem::replace(&mut *state, State::Delivered) {
            State::Ready(result) => Poll::Ready(result),
            State::Pending { deliver, .. } => {
                *state = State::Pending {
                    waker: Some(cx.waker().clone()),
                    deliver,
                };
                Poll::Pending
            }
            State::Delivered => Poll::Ready(Err(ProcessingError::internal(
                "invocation polled after completion",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_first_settle_wins() {
        let (invocation, settler) = pending::<&str>(Uuid::new_v4());
        assert!(!invocation.is_done());
        assert!(settler.settle(Origin::Exchange, Ok("first")));
        assert!(!settler.settle(Origin::Timer, Err(ProcessingError::timeout(Duration::ZERO))));
        assert!(invocation.is_done());
        assert_eq!(invocation.wait().unwrap(), "first");
    }

    #[test]
    fn test_wait_parks_until_settled() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            settler.settle(Origin::Exchange, Ok(42))
        });
        assert_eq!(invocation.wait().unwrap(), 42);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_returns_invocation() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        let invocation = invocation
            .wait_timeout(Duration::from_millis(20))
            .unwrap_err();
        settler.settle(Origin::Exchange, Ok(1));
        let outcome = invocation.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.unwrap(), 1);
    }

    #[test]
    fn test_future_wakes_on_settle() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        let mut fut = task::spawn(invocation);
        assert_pending!(fut.poll());
        settler.settle(Origin::Exchange, Ok(5));
        assert!(fut.is_woken());
        assert_eq!(assert_ready!(fut.poll()).unwrap(), 5);
    }

    #[test]
    fn test_callback_called_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        let (ok, err) = (Arc::clone(&calls), Arc::clone(&calls));
        invocation.on_complete(callback(
            move |v: u32| {
                assert_eq!(v, 9);
                ok.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                err.fetch_add(100, Ordering::SeqCst);
            },
        ));
        settler.settle(Origin::Exchange, Ok(9));
        settler.settle(Origin::Timer, Err(ProcessingError::timeout(Duration::ZERO)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_settle_has_one_winner() {
        for _ in 0..500 {
            let delivered = Arc::new(AtomicUsize::new(0));
            let (invocation, settler) = pending::<u32>(Uuid::new_v4());
            let (ok, err) = (Arc::clone(&delivered), Arc::clone(&delivered));
            invocation.on_complete(callback(
                move |_: u32| {
                    ok.fetch_add(1, Ordering::SeqCst);
                },
                move |_| {
                    err.fetch_add(1, Ordering::SeqCst);
                },
            ));

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let racers: Vec<_> = [Origin::Exchange, Origin::Timer]
                .into_iter()
                .map(|origin| {
                    let settler = settler.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        let outcome = match origin {
                            Origin::Timer => Err(ProcessingError::timeout(Duration::ZERO)),
                            _ => Ok(1),
                        };
                        settler.settle(origin, outcome)
                    })
                })
                .collect();
            let winners = racers
                .into_iter()
                .map(|racer| racer.join().unwrap())
                .filter(|won| *won)
                .count();

            assert_eq!(winners, 1);
            assert_eq!(delivered.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_callback_after_completion_runs_immediately() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        settler.settle(Origin::Exchange, Err(ProcessingError::internal("boom")));
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        invocation.on_complete(callback(
            |_: u32| panic!("unexpected success"),
            move |e| *slot.lock() = Some(e.kind()),
        ));
        assert_eq!(*seen.lock(), Some(FailureKind::Internal));
    }

    #[test]
    fn test_cancel_claims_and_reports() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        assert!(invocation.cancel());
        assert!(!invocation.cancel());
        assert!(!settler.settle(Origin::Exchange, Ok(3)));
        assert_eq!(invocation.wait().unwrap_err().kind(), FailureKind::Cancelled);
    }

    #[tokio::test]
    async fn test_winner_aborts_other_tasks() {
        let (invocation, settler) = pending::<u32>(Uuid::new_v4());
        let sleeper = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        settler.attach(Origin::Timer, sleeper.abort_handle());
        settler.settle(Origin::Exchange, Ok(1));
        assert!(sleeper.await.unwrap_err().is_cancelled());
        assert_eq!(invocation.await.unwrap(), 1);

        // Attaching after completion aborts immediately.
        let late = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        settler.attach(Origin::Timer, late.abort_handle());
        assert!(late.await.unwrap_err().is_cancelled());
    }
}
