use std::sync::Arc;

use engine_core::types::{LOCAL_SPACE_ID, RoomKind};
use engine_platform::{DocumentSink, InMemorySink};
use engine_runtime::{Session, SessionConfig};
use tracing::info;

mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        eprintln!("smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let sink: Arc<dyn DocumentSink> = Arc::new(InMemorySink::default());
    let session = Session::new(SessionConfig::default(), sink);
    session.bootstrap_local().await?;

    let room_id = session
        .create_room(LOCAL_SPACE_ID, "general", RoomKind::Text)
        .await?;
    session.create_category(LOCAL_SPACE_ID, "Ops").await?;
    session
        .move_room_to_category(LOCAL_SPACE_ID, &room_id, "ops", None)
        .await?;
    session.set_active_room(Some(room_id.clone())).await;
    session.send_message(&room_id, "hello from local mode").await?;

    let snapshot = session.snapshot().await;
    info!(
        spaces = snapshot.spaces.len(),
        rooms = snapshot.rooms.len(),
        "local session ready"
    );
    for space in &snapshot.spaces {
        println!("space {} ({})", space.name, space.id);
        for category in snapshot.categories_in_space(&space.id) {
            println!("  category {} [{}]", category.name, category.id);
        }
        for room in snapshot.rooms_in_space(&space.id) {
            println!("  room {} -> {}", room.name, room.category_id);
        }
    }
    for message in snapshot.messages_in_room(&room_id) {
        println!("message [{:?}] {}: {}", message.status, message.author_id, message.body);
    }

    Ok(())
}
