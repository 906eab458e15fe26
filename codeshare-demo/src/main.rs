//! CodeShare demo: two participants share one room.
//!
//! Alice and Bob join the same room, each keeping a [`RoomView`] fed from
//! the bus. Alice edits and runs code, Bob draws on the whiteboard, and
//! both views are printed once the room settles.
//!
//! Set `RUST_LOG=debug` to watch bus and presence activity. Pass a path
//! as the first argument to persist the room with RocksDB.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use codeshare_collab::{
    CollabConfig, CollabEngine, CollabError, CursorPosition, DrawOp, Language, Point, RoomView,
    Session, Subscription,
};
use log::info;
use uuid::Uuid;

const ROOM: &str = "demo-room";

/// Keep `view` up to date from the session's subscription.
fn attach(session: &Session, view: RoomView) -> (Arc<Mutex<RoomView>>, Subscription) {
    let view = Arc::new(Mutex::new(view));
    let sink = view.clone();
    let subscription = session.subscribe(move |event| {
        if let Ok(mut view) = sink.lock() {
            view.apply(event);
        }
    });
    (view, subscription)
}

fn print_view(label: &str, view: &RoomView) {
    println!("── {label} ──");
    println!("language: {}", view.language());
    println!(
        "users:    {}",
        view.users()
            .iter()
            .map(|u| format!("{} ({:?})", u.name, u.status))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("code:\n{}", view.code());
    if let Some((author, result)) = view.last_execution() {
        println!("last run by {}: {:?}", short(*author), result);
    }
    println!();
}

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

#[tokio::main]
async fn main() -> Result<(), CollabError> {
    env_logger::init();

    let mut config = CollabConfig::default();
    if let Some(path) = std::env::args().nth(1) {
        config = config.with_storage(path);
    }
    info!("Starting CodeShare demo (storage: {:?})", config.storage_path);

    let engine = CollabEngine::new(config)?;
    let reaper = engine.spawn_reaper();

    let alice = engine.join(ROOM, "Alice").await?;
    let bob = engine.join(ROOM, "Bob").await?;
    info!(
        "Alice is {}, Bob is {}",
        short(alice.user_id()),
        short(bob.user_id())
    );

    let (alice_view, _alice_sub) = attach(&alice, alice.view().await);
    let (bob_view, _bob_sub) = attach(&bob, bob.view().await);

    let draws = Arc::new(Mutex::new(Vec::new()));
    let draw_sink = draws.clone();
    let _board = alice.subscribe_draw_ops(move |event| {
        if let (Ok(op), Ok(mut ops)) = (event.draw_op(), draw_sink.lock()) {
            ops.push(op.clone());
        }
    });

    // Alice switches to Python and writes a program.
    let code = "def greet():\n    print(\"Hello from Alice\")\n\nprint(6 * 7)\ngreet()";
    if let Ok(mut view) = alice_view.lock() {
        view.set_local_language(Language::Python);
        view.set_local_code(code);
    }
    alice.set_language(Language::Python).await;
    alice.set_code(code).await;
    alice.update_cursor(CursorPosition::new(5, 7)).await;

    // Bob sketches while Alice runs.
    bob.publish_draw_op(DrawOp::rectangle_from_drag(
        Point::new(10.0, 10.0),
        Point::new(110.0, 60.0),
        "#1e90ff",
    ));
    bob.publish_draw_op(DrawOp::erase_at(Point::new(20.0, 20.0), 20.0));

    let result = alice.execute(code, &Language::Python).await;
    println!("Alice ran her code: {result:?}\n");

    let busy = alice.execute(code, &Language::Python).await;
    println!("Immediate re-run: {busy:?}\n");

    alice.save(code, &Language::Python).await?;
    info!("Saved {ROOM}");

    // Let deliveries and the typing revert settle.
    tokio::time::sleep(engine.config().typing_revert_delay + Duration::from_millis(300)).await;

    if let Ok(view) = alice_view.lock() {
        print_view("Alice's view", &view);
    }
    if let Ok(view) = bob_view.lock() {
        print_view("Bob's view", &view);
        if let Some(cursor) = view.cursor(alice.user_id()) {
            println!("Bob sees Alice's cursor at {}:{}", cursor.line, cursor.column);
        }
    }
    if let Ok(ops) = draws.lock() {
        println!("Alice received {} whiteboard op(s)", ops.len());
    }
    println!("Bus: {:?}", engine.bus().stats());

    bob.leave().await;
    alice.leave().await;
    reaper.abort();
    info!("Demo finished");
    Ok(())
}
