use core::time::Duration;
use greeter_lb_client::{
    ConnectOptions, Connection, DispatchOptions, Greet, Policy, ServiceConfig, connect, dispatch,
};
use greeter_lb_core::{
    Error,
    shutdown::{Coordinator, Guard, Outcome, Signal},
};
use greeter_lb_server::{GreeterService, greeting, serve, server::metrics::Metrics};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

struct Backend {
    addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<greeter_lb_core::Result<()>>,
}

impl Backend {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(Metrics::new(addr.to_string()).unwrap());
        let service = GreeterService::new(addr.to_string(), metrics);
        let stop = CancellationToken::new();
        let task = tokio::spawn(serve(listener, service, stop.clone()));
        Self { addr, stop, task }
    }

    async fn stop(self) {
        self.stop.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// An address nothing listens on.
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn options() -> ConnectOptions {
    ConnectOptions {
        connect_timeout: Duration::from_secs(1),
        backoff: Duration::from_secs(60),
    }
}

async fn dial(addrs: &[SocketAddr], policy: Policy) -> Connection {
    let target = addrs
        .iter()
        .map(|addr| format!("dns:///{addr}"))
        .collect::<Vec<_>>()
        .join(",");
    let payload = ServiceConfig::new(policy).to_json().unwrap();
    connect(&target, &payload, &options()).await.unwrap()
}

async fn hello(connection: &Connection) -> Result<String, tonic::Status> {
    connection
        .client()
        .greet("Tiago", Duration::from_secs(2))
        .await
}

#[tokio::test]
async fn round_robin_alternates_between_backends() {
    let one = Backend::start().await;
    let two = Backend::start().await;
    let connection = dial(&[one.addr, two.addr], Policy::RoundRobin).await;
    assert_eq!(connection.addrs(), vec![one.addr, two.addr]);
    assert_eq!(connection.settle(2).await, 2);

    let mut replies = Vec::new();
    for _ in 0..4 {
        replies.push(hello(&connection).await.unwrap());
    }

    let from_one = greeting("Tiago", &one.addr.to_string());
    let from_two = greeting("Tiago", &two.addr.to_string());
    assert_eq!(replies, vec![from_one.clone(), from_two.clone(), from_one, from_two]);

    one.stop().await;
    two.stop().await;
}

#[tokio::test]
async fn pick_first_stays_on_the_first_backend() {
    let one = Backend::start().await;
    let two = Backend::start().await;
    let connection = dial(&[one.addr, two.addr], Policy::PickFirst).await;

    let expected = greeting("Tiago", &one.addr.to_string());
    for _ in 0..4 {
        assert_eq!(hello(&connection).await.unwrap(), expected);
    }

    one.stop().await;
    two.stop().await;
}

fn bounded(count: u64) -> DispatchOptions {
    DispatchOptions {
        name: "Tiago".to_string(),
        count: Some(count),
        deadline: Duration::from_secs(2),
        pause: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn pick_first_skips_an_unreachable_first_backend() {
    let dead = dead_addr().await;
    let live = Backend::start().await;
    let connection = dial(&[dead, live.addr], Policy::PickFirst).await;

    let mut messages = Vec::new();
    let done = dispatch(
        connection.client(),
        &bounded(4),
        CancellationToken::new(),
        |message| messages.push(message.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(done, 4);
    let expected = greeting("Tiago", &live.addr.to_string());
    assert!(messages.iter().all(|m| *m == expected));
    assert_eq!(connection.ready_addrs(), vec![live.addr]);

    live.stop().await;
}

#[tokio::test]
async fn pick_first_fails_over_when_the_pinned_backend_stops() {
    let one = Backend::start().await;
    let two = Backend::start().await;
    let connection = dial(&[one.addr, two.addr], Policy::PickFirst).await;

    let from_one = greeting("Tiago", &one.addr.to_string());
    let from_two = greeting("Tiago", &two.addr.to_string());
    assert_eq!(hello(&connection).await.unwrap(), from_one);

    one.stop().await;

    // The stopped backend reports NOT_SERVING before it drains, so no call
    // is routed to it afterwards.
    for _ in 0..4 {
        assert_eq!(hello(&connection).await.unwrap(), from_two);
    }

    two.stop().await;
}

#[tokio::test]
async fn round_robin_skips_an_unreachable_backend() {
    let dead = dead_addr().await;
    let live = Backend::start().await;
    let connection = dial(&[live.addr, dead], Policy::RoundRobin).await;

    let mut messages = Vec::new();
    let done = dispatch(
        connection.client(),
        &bounded(4),
        CancellationToken::new(),
        |message| messages.push(message.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(done, 4);
    let expected = greeting("Tiago", &live.addr.to_string());
    assert!(messages.iter().all(|m| *m == expected));

    live.stop().await;
}

#[tokio::test]
async fn bounded_dispatch_prints_one_message_per_call() {
    let one = Backend::start().await;
    let two = Backend::start().await;
    let connection = dial(&[one.addr, two.addr], Policy::RoundRobin).await;
    assert_eq!(connection.settle(2).await, 2);

    let mut messages = Vec::new();
    let done = dispatch(
        connection.client(),
        &bounded(4),
        CancellationToken::new(),
        |message| messages.push(message.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(done, 4);
    assert_eq!(messages.len(), 4);
    let from_one = greeting("Tiago", &one.addr.to_string());
    assert_eq!(messages.iter().filter(|m| **m == from_one).count(), 2);

    one.stop().await;
    two.stop().await;
}

#[tokio::test]
async fn dispatch_without_a_reachable_backend_fails_on_the_first_call() {
    let dead = dead_addr().await;
    let connection = dial(&[dead], Policy::PickFirst).await;

    let mut replies = 0;
    let err = dispatch(
        connection.client(),
        &bounded(3),
        CancellationToken::new(),
        |_| replies += 1,
    )
    .await
    .unwrap_err();

    assert_eq!(replies, 0);
    assert!(matches!(err, Error::Call { .. }));
    assert_eq!(err.to_string(), "calling SayHello");
}

#[tokio::test]
async fn released_connection_refuses_further_calls() {
    let live = Backend::start().await;
    let connection = Guard::new(dial(&[live.addr], Policy::PickFirst).await);
    let mut client = connection.client();
    assert!(hello(&connection).await.is_ok());

    connection.release();

    let status = client
        .greet("Tiago", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);

    live.stop().await;
}

#[tokio::test]
async fn signal_stops_an_unbounded_dispatch_cleanly() {
    let live = Backend::start().await;
    let connection = Guard::new(dial(&[live.addr], Policy::RoundRobin).await);
    let client = connection.client();

    let options = DispatchOptions {
        name: "Tiago".to_string(),
        count: None,
        deadline: Duration::from_secs(2),
        pause: Duration::from_millis(20),
    };
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();

    let outcome = Coordinator::new(Duration::from_secs(2))
        .run(
            move |stop| async move {
                let done = dispatch(client, &options, stop, |message| {
                    let _ = replies_tx.send(message.to_string());
                })
                .await?;
                let _ = done_tx.send(done);
                Ok::<_, Error>(())
            },
            async move {
                for _ in 0..2 {
                    replies_rx.recv().await;
                }
                Signal::Interrupt
            },
        )
        .await;

    assert!(matches!(outcome, Outcome::Signalled(Signal::Interrupt)));
    // The loop saw the stop request and returned without a call error.
    let done = done_rx.await.unwrap();
    assert!(done >= 2, "only {done} call(s) completed");

    let mut client = connection.client();
    connection.release();
    let status = client
        .greet("Tiago", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);

    live.stop().await;
}
