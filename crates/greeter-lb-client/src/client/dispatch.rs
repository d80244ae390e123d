//! The sequential `SayHello` dispatch loop.
//!
//! [`dispatch`] issues one call at a time, each bounded by its own deadline,
//! hands every reply to the caller, and pauses between calls. The first failed
//! call ends the loop with [`Error::Call`]; nothing is retried.

use crate::client::balance::BalancedChannel;
use core::future::Future;
use core::time::Duration;
use greeter_lb_core::{
    Error, Result,
    proto::{HelloRequest, greeter_client::GreeterClient},
};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Status};

/// Anything that can perform a single `SayHello` round trip.
pub trait Greet {
    /// Sends `name` and resolves to the reply message.
    ///
    /// `deadline` is advisory for the remote side; the dispatcher enforces it
    /// locally as well.
    fn greet(
        &mut self,
        name: &str,
        deadline: Duration,
    ) -> impl Future<Output = core::result::Result<String, Status>> + Send;
}

impl Greet for GreeterClient<BalancedChannel> {
    fn greet(
        &mut self,
        name: &str,
        deadline: Duration,
    ) -> impl Future<Output = core::result::Result<String, Status>> + Send {
        let mut request = Request::new(HelloRequest {
            name: name.to_string(),
        });
        request.set_timeout(deadline);
        async move { Ok(self.say_hello(request).await?.into_inner().message) }
    }
}

/// Settings for one dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Name carried by every request.
    pub name: String,
    /// Number of calls to make; `None` runs until stopped.
    pub count: Option<u64>,
    /// Per-call deadline.
    pub deadline: Duration,
    /// Pause between consecutive calls.
    pub pause: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            count: None,
            deadline: Duration::from_secs(1),
            pause: Duration::from_secs(1),
        }
    }
}

/// Runs the dispatch loop and returns the number of successful calls.
///
/// In bounded mode exactly `count` calls are made with a pause between each
/// pair. In unbounded mode the loop runs until `stop` is cancelled.
/// Cancellation is only observed between calls, so an in-flight call always
/// completes (or hits its deadline) first.
///
/// # Errors
///
/// Returns [`Error::Call`] for the first call that fails or exceeds its
/// deadline.
pub async fn dispatch<G, F>(
    mut greeter: G,
    options: &DispatchOptions,
    stop: CancellationToken,
    mut on_reply: F,
) -> Result<u64>
where
    G: Greet,
    F: FnMut(&str),
{
    let mut completed = 0u64;

    loop {
        if options.count.is_some_and(|count| completed >= count) || stop.is_cancelled() {
            break;
        }

        let call = greeter.greet(&options.name, options.deadline);
        let message = match tokio::time::timeout(options.deadline, call).await {
            Ok(Ok(message)) => message,
            Ok(Err(status)) => {
                tracing::error!("Call {} failed: {status}", completed + 1);
                return Err(Error::Call { status });
            }
            Err(_) => {
                tracing::error!(
                    "Call {} exceeded its {:?} deadline",
                    completed + 1,
                    options.deadline
                );
                return Err(Error::Call {
                    status: Status::deadline_exceeded(format!(
                        "no reply within {:?}",
                        options.deadline
                    )),
                });
            }
        };

        completed += 1;
        on_reply(&message);

        if options.count.is_some_and(|count| completed >= count) {
            break;
        }

        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(options.pause) => {}
        }
    }

    tracing::debug!("Dispatch finished after {completed} call(s)");
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::Instant;

    /// Answers with the call number, failing from `fail_at` onwards, and
    /// records when each call was issued.
    struct Scripted {
        calls: Arc<AtomicU64>,
        fail_at: Option<u64>,
        hang: bool,
        issued_at: Vec<Instant>,
    }

    impl Scripted {
        fn new(calls: Arc<AtomicU64>) -> Self {
            Self {
                calls,
                fail_at: None,
                hang: false,
                issued_at: Vec::new(),
            }
        }
    }

    impl Greet for &mut Scripted {
        fn greet(
            &mut self,
            name: &str,
            _deadline: Duration,
        ) -> impl Future<Output = core::result::Result<String, Status>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.issued_at.push(Instant::now());
            let fail = self.fail_at.is_some_and(|at| n >= at);
            let hang = self.hang;
            let name = name.to_string();
            async move {
                if hang {
                    core::future::pending::<()>().await;
                }
                if fail {
                    Err(Status::unavailable("backend gone"))
                } else {
                    Ok(format!("Hello, {name} #{n}"))
                }
            }
        }
    }

    fn options(count: Option<u64>) -> DispatchOptions {
        DispatchOptions {
            name: "Tiago".to_string(),
            count,
            deadline: Duration::from_secs(1),
            pause: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_makes_exactly_n_calls_separated_by_the_pause() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut greeter = Scripted::new(Arc::clone(&calls));
        let mut replies = Vec::new();

        let done = dispatch(&mut greeter, &options(Some(4)), CancellationToken::new(), |m| {
            replies.push(m.to_string())
        })
        .await
        .unwrap();

        assert_eq!(done, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            replies,
            vec![
                "Hello, Tiago #1",
                "Hello, Tiago #2",
                "Hello, Tiago #3",
                "Hello, Tiago #4"
            ]
        );
        for pair in greeter.issued_at.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_makes_no_calls() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut greeter = Scripted::new(Arc::clone(&calls));
        let done = dispatch(&mut greeter, &options(Some(0)), CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(done, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_stops_the_loop() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut greeter = Scripted::new(Arc::clone(&calls));
        greeter.fail_at = Some(3);
        let mut replies = 0;

        let err = dispatch(&mut greeter, &options(Some(10)), CancellationToken::new(), |_| {
            replies += 1
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(replies, 2);
        assert!(err.to_string().contains("calling"));
        assert_eq!(err.status().map(Status::code), Some(tonic::Code::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_enforced_per_call() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut greeter = Scripted::new(Arc::clone(&calls));
        greeter.hang = true;

        let err = dispatch(&mut greeter, &options(None), CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            err.status().map(Status::code),
            Some(tonic::Code::DeadlineExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_run_stops_between_calls_when_cancelled() {
        let calls = Arc::new(AtomicU64::new(0));
        let stop = CancellationToken::new();
        let task = {
            let calls = Arc::clone(&calls);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut greeter = Scripted::new(calls);
                dispatch(&mut greeter, &options(None), stop, |_| {}).await
            })
        };

        // Three calls land at t = 0s, 1s, 2s; cancel during the third pause.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stop.cancel();

        let done = task.await.unwrap().unwrap();
        assert_eq!(done, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
