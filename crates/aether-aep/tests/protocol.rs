//! End-to-end protocol tests over localhost TCP.

use aether_aep::{AepClient, AepServer, Outcome, ServerConfig};
use aether_core::{CompoundDimension, Context, ContextOp};
use aether_sched::TokenFlags;
use aether_share::{Notification, NotifyKind, Participant, ParticipantId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn path(s: &str) -> CompoundDimension {
    CompoundDimension::parse(s).unwrap()
}

fn ctx(s: &str) -> Context {
    Context::parse(s).unwrap()
}

fn op(s: &str) -> ContextOp {
    ContextOp::parse(s).unwrap()
}

struct Recorder {
    events: Mutex<Vec<Notification>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        })
    }

    async fn wait_for(&self, count: usize) -> Vec<Notification> {
        timeout(Duration::from_secs(5), async {
            loop {
                {
                    let events = self.events.lock();
                    if events.len() >= count {
                        return events.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for notifications")
    }
}

impl Participant for Recorder {
    fn notify(&self, event: Notification) {
        self.events.lock().push(event);
    }
}

async fn start() -> AepServer {
    AepServer::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_join_mutate_notify_across_connections() {
    for mode in [aether_wire::Mode::Native, aether_wire::Mode::Xdr] {
        let server = start().await;
        let addr = server.local_addr();

        let observer = AepClient::connect(addr, mode, true).await.unwrap();
        let recorder = Recorder::new();
        let joined = observer
            .join(ParticipantId(1), path("reactor"), recorder.clone(), false, None)
            .await
            .unwrap();
        assert!(matches!(joined, Outcome::Ok(_)));

        let writer = AepClient::connect(addr, mode, true).await.unwrap();
        let w = Recorder::new();
        writer
            .join(ParticipantId(1), path("reactor:core"), w.clone(), false, None)
            .await
            .unwrap();
        writer
            .apply(
                ParticipantId(1),
                path("reactor:core"),
                op("[--+temp:[10+--]]"),
                TokenFlags::fenced(),
            )
            .await
            .unwrap();
        writer.synch(0).await.unwrap();

        let events = recorder.wait_for(1).await;
        match &events[0].kind {
            NotifyKind::Apply(received) => {
                assert_eq!(received.canonical(), "[--+temp:[10+--]]");
            }
            other => panic!("expected apply, got {:?}", other),
        }
        assert_eq!(events[0].path, path("core"));

        drop(observer);
        drop(writer);
        let aether = server.shutdown().await.unwrap();
        assert_eq!(
            aether.state().canonical(),
            "<reactor:<core:<temp:<10>>>>"
        );
    }
}

#[tokio::test]
async fn test_join_with_notify_delivers_initial_content() {
    let server = start().await;
    let addr = server.local_addr();

    let writer = AepClient::connect(addr, aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let w = Recorder::new();
    writer
        .join(ParticipantId(1), path("reactor"), w, false, None)
        .await
        .unwrap();
    writer
        .assign(
            ParticipantId(1),
            path("reactor"),
            ctx("<core:<temp:<10>>>"),
            TokenFlags::fenced(),
        )
        .await
        .unwrap();
    writer.synch(0).await.unwrap();

    let reader = AepClient::connect(addr, aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let recorder = Recorder::new();
    reader
        .join(ParticipantId(1), path("reactor:core"), recorder.clone(), true, None)
        .await
        .unwrap();

    let events = recorder.wait_for(1).await;
    assert_eq!(events[0].kind, NotifyKind::Assign(ctx("<temp:<10>>")));
}

#[tokio::test]
async fn test_duplicate_join_is_denied() {
    let server = start().await;
    let client = AepClient::connect(server.local_addr(), aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let recorder = Recorder::new();
    let first = client
        .join(ParticipantId(3), path("a"), recorder.clone(), false, None)
        .await
        .unwrap();
    assert!(matches!(first, Outcome::Ok(_)));
    let second = client
        .join(ParticipantId(3), path("a"), recorder, false, None)
        .await
        .unwrap();
    assert!(matches!(second, Outcome::Denied(_)));
}

#[tokio::test]
async fn test_mutation_without_join_is_refused_silently() {
    let server = start().await;
    let client = AepClient::connect(server.local_addr(), aether_wire::Mode::Native, true)
        .await
        .unwrap();
    // never joined; the deny comes back as an unsolicited reply and the
    // connection must stay usable
    client
        .assign(ParticipantId(9), path("a"), ctx("<1>"), TokenFlags::default())
        .await
        .unwrap();
    let outcome = client.synch(0).await.unwrap();
    assert!(matches!(outcome, Outcome::Ok(_)));

    drop(client);
    let aether = server.shutdown().await.unwrap();
    assert!(aether.state().is_empty());
}

#[tokio::test]
async fn test_disconnect_detaches_participants() {
    let server = start().await;
    let addr = server.local_addr();

    let observer = AepClient::connect(addr, aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let recorder = Recorder::new();
    observer
        .join(ParticipantId(1), path("a"), recorder, false, None)
        .await
        .unwrap();

    let transient = AepClient::connect(addr, aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let t = Recorder::new();
    transient
        .join(ParticipantId(1), path("a"), t, false, None)
        .await
        .unwrap();
    transient.disconnect().await.unwrap();

    // the observer's connection is unaffected and the server still runs
    let outcome = observer.synch(0).await.unwrap();
    assert!(matches!(outcome, Outcome::Ok(_)));

    drop(observer);
    let aether = server.shutdown().await.unwrap();
    assert_eq!(aether.participant_count(), 1);
}

#[tokio::test]
async fn test_synch_reflects_flush_sequence() {
    let server = start().await;
    let client = AepClient::connect(server.local_addr(), aether_wire::Mode::Native, true)
        .await
        .unwrap();
    let recorder = Recorder::new();
    client
        .join(ParticipantId(1), path("a"), recorder, false, None)
        .await
        .unwrap();

    client
        .assign(ParticipantId(1), path("a"), ctx("<1>"), TokenFlags::fenced())
        .await
        .unwrap();
    let first = client.synch(0).await.unwrap();
    let Outcome::Ok(seq1) = first else {
        panic!("synch refused: {:?}", first);
    };
    assert!(seq1 >= 1);

    client
        .assign(ParticipantId(1), path("a"), ctx("<2>"), TokenFlags::fenced())
        .await
        .unwrap();
    let second = client.synch(seq1 + 1).await.unwrap();
    let Outcome::Ok(seq2) = second else {
        panic!("synch refused: {:?}", second);
    };
    assert!(seq2 > seq1);
}
