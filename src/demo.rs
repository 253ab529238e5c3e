//! Demonstration harness: the value algebra on its own, then the full
//! client/server path over localhost.

use aether_aep::{AepClient, AepServer, Outcome, ServerConfig};
use aether_core::{CompoundDimension, Context, ContextOp};
use aether_sched::TokenFlags;
use aether_share::{Notification, Participant, ParticipantId};
use aether_wire::Mode;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn path(s: &str) -> CompoundDimension {
    CompoundDimension::parse(s).expect("demo path")
}

struct Printer {
    name: &'static str,
    events: Mutex<Vec<Notification>>,
}

impl Printer {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Printer {
            name,
            events: Mutex::new(Vec::new()),
        })
    }
}

impl Participant for Printer {
    fn notify(&self, event: Notification) {
        let what = match &event.kind {
            aether_share::NotifyKind::Assign(v) => format!("assign {}", v.canonical()),
            aether_share::NotifyKind::Apply(op) => format!("apply {}", op.canonical()),
            aether_share::NotifyKind::Clear => "clear".to_string(),
            aether_share::NotifyKind::Kick => "kick".to_string(),
        };
        println!(
            "  [{}] seq={} path=\"{}\" {}",
            self.name, event.sequence, event.path, what
        );
        self.events.lock().push(event);
    }
}

pub async fn run() {
    println!("== the value algebra ==");
    algebra_demo();

    println!("\n== client/server over localhost ==");
    protocol_demo().await;
}

fn algebra_demo() {
    let mut state = Context::parse("<reactor:<core:<temp:<4+history:<3>>+pressure:<70>>>>")
        .expect("demo context");
    println!("  start: {}", state.canonical());

    let op = ContextOp::parse("[reactor:[core:[--+temp:[10+--]]]]").expect("demo op");
    println!("  op:    {}", op.canonical());
    state.apply_at(&CompoundDimension::root(), &op);
    println!("  after: {}", state.canonical());

    let weak = Context::parse("<reactor:<core:<_>>>").expect("demo context");
    println!(
        "  {} refines to {}: {}",
        weak.canonical(),
        state.canonical(),
        weak.refines_to(&state)
    );
}

async fn protocol_demo() {
    let server = AepServer::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .expect("bind demo server");
    let addr = server.local_addr();
    println!("  server on {}", addr);

    let observer = AepClient::connect(addr, Mode::Native, true)
        .await
        .expect("connect observer");
    let printer = Printer::new("observer@reactor");
    observer
        .join(ParticipantId(1), path("reactor"), printer.clone(), false, None)
        .await
        .expect("join observer");

    let writer = AepClient::connect(addr, Mode::Xdr, true)
        .await
        .expect("connect writer");
    let w = Printer::new("writer@reactor:core");
    writer
        .join(ParticipantId(1), path("reactor:core"), w, false, None)
        .await
        .expect("join writer");

    writer
        .assign(
            ParticipantId(1),
            path("reactor:core"),
            Context::parse("<temp:<4>+pressure:<70>>").expect("demo context"),
            TokenFlags::default(),
        )
        .await
        .expect("assign");
    writer
        .apply(
            ParticipantId(1),
            path("reactor:core"),
            ContextOp::parse("[--+temp:[10+--]]").expect("demo op"),
            TokenFlags::fenced(),
        )
        .await
        .expect("apply");

    match writer.synch(0).await.expect("synch") {
        Outcome::Ok(seq) => println!("  synch at server sequence {}", seq),
        other => println!("  synch refused: {:?}", other),
    }
    // give the observer's socket a moment to drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("  observer saw {} notifications", printer.events.lock().len());

    drop(observer);
    drop(writer);
    let aether = server.shutdown().await.expect("shutdown");
    println!("  final state: {}", aether.state().canonical());
}
