//! Staggered connection racing over candidate addresses (RFC 8305).

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use pin_project_lite::pin_project;
use tokio::select;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::transport::{BoxIo, Connect};

pin_project! {
    /// One connection attempt, remembering where it goes.
    struct Attempt<'a> {
        address: SocketAddr,
        #[pin]
        connecting: BoxFuture<'a, io::Result<BoxIo>>,
    }
}

impl Future for Attempt<'_> {
    type Output = (SocketAddr, io::Result<BoxIo>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.connecting.poll(cx));
        Poll::Ready((*this.address, result))
    }
}

/// Connects to the first address that answers.
///
/// The first candidate starts immediately. Each further candidate starts when
/// the previous one failed or `delay` passed without a winner, whichever comes
/// first. The first success wins and drops every attempt still running.
pub(crate) async fn connect(connector: &dyn Connect, addresses: &[SocketAddr], delay: Duration) -> io::Result<(BoxIo, SocketAddr)> {
    let mut candidates = addresses.iter().copied();
    let Some(first) = candidates.next() else {
        return Err(io::Error::new(io::ErrorKind::NotFound, "no address to connect to"));
    };

    let start = |address: SocketAddr| {
        trace!(%address, "start connection attempt");
        Attempt { address, connecting: connector.connect(address) }
    };

    let mut attempts = FuturesUnordered::new();
    attempts.push(start(first));

    let stagger = sleep(delay);
    tokio::pin!(stagger);
    let mut last_error = None;

    loop {
        let has_more = candidates.len() > 0;
        select! {
            Some((address, result)) = attempts.next() => match result {
                Ok(io) => {
                    debug!(%address, "connection attempt won");
                    return Ok((io, address));
                }
                Err(e) => {
                    debug!(%address, cause = %e, "connection attempt failed");
                    last_error = Some(e);
                    if let Some(next) = candidates.next() {
                        attempts.push(start(next));
                        stagger.as_mut().reset(Instant::now() + delay);
                    } else if attempts.is_empty() {
                        break;
                    }
                }
            },
            () = &mut stagger, if has_more => {
                if let Some(next) = candidates.next() {
                    attempts.push(start(next));
                }
                stagger.as_mut().reset(Instant::now() + delay);
            }
            else => break,
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("all connection attempts failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    enum Behavior {
        Succeed(Duration),
        Fail(Duration),
        Hang,
    }

    struct ScriptedConnector {
        behaviors: HashMap<SocketAddr, Behavior>,
        started: Mutex<Vec<(SocketAddr, Instant)>>,
    }

    impl ScriptedConnector {
        fn new(behaviors: Vec<(SocketAddr, Behavior)>) -> Self {
            Self { behaviors: behaviors.into_iter().collect(), started: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Connect for ScriptedConnector {
        async fn connect(&self, address: SocketAddr) -> io::Result<BoxIo> {
            self.started.lock().unwrap().push((address, Instant::now()));
            match self.behaviors.get(&address) {
                Some(Behavior::Succeed(after)) => {
                    sleep(*after).await;
                    let (client, _server) = tokio::io::duplex(64);
                    Ok(Box::new(client))
                }
                Some(Behavior::Fail(after)) => {
                    sleep(*after).await;
                    Err(io::ErrorKind::ConnectionRefused.into())
                }
                Some(Behavior::Hang) | None => std::future::pending().await,
            }
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn second_candidate_starts_after_the_stagger() {
        let connector = ScriptedConnector::new(vec![
            (addr("[::1]:80"), Behavior::Hang),
            (addr("127.0.0.1:80"), Behavior::Succeed(Duration::from_millis(10))),
        ]);
        let begin = Instant::now();

        let (_, winner) = connect(&connector, &[addr("[::1]:80"), addr("127.0.0.1:80")], Duration::from_millis(250)).await.unwrap();

        assert_eq!(winner, addr("127.0.0.1:80"));
        let started = connector.started.lock().unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].1 - begin, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_starts_the_next_candidate_at_once() {
        let connector = ScriptedConnector::new(vec![
            (addr("10.0.0.1:80"), Behavior::Fail(Duration::from_millis(5))),
            (addr("10.0.0.2:80"), Behavior::Succeed(Duration::from_millis(5))),
        ]);
        let begin = Instant::now();

        let (_, winner) = connect(&connector, &[addr("10.0.0.1:80"), addr("10.0.0.2:80")], Duration::from_millis(250)).await.unwrap();

        assert_eq!(winner, addr("10.0.0.2:80"));
        assert_eq!(connector.started.lock().unwrap()[1].1 - begin, Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn all_candidates_failing_reports_the_last_error() {
        let connector = ScriptedConnector::new(vec![
            (addr("10.0.0.1:80"), Behavior::Fail(Duration::from_millis(1))),
            (addr("10.0.0.2:80"), Behavior::Fail(Duration::from_millis(1))),
        ]);

        let error = connect(&connector, &[addr("10.0.0.1:80"), addr("10.0.0.2:80")], Duration::from_millis(250)).await.err().unwrap();
        assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn no_candidates() {
        let connector = ScriptedConnector::new(Vec::new());
        let error = connect(&connector, &[], Duration::from_millis(250)).await.err().unwrap();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
