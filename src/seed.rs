use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::Room;
use crate::store::ReservationStore;

/// Parse a JSON array of rooms.
pub fn parse_rooms(json: &str) -> Result<Vec<Room>> {
    serde_json::from_str(json).map_err(|e| Error::StorageError(format!("rooms file: {e}")))
}

/// Upsert every room in the file at `path` into `store`.
pub async fn load_rooms_file(store: &impl ReservationStore, path: &Path) -> Result<usize> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::StorageError(format!("{}: {e}", path.display())))?;
    let rooms = parse_rooms(&json)?;
    let count = rooms.len();
    for room in rooms {
        store.upsert_room(room).await?;
    }
    info!("seeded {count} rooms from {}", path.display());
    Ok(count)
}
