use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::{ReservationStore, validate_new_reservation, validate_room};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Log writer task ─────────────────────────────────────

/// Most requests folded into one commit.
const MAX_COMMIT_BATCH: usize = 256;

enum LogRequest {
    /// Durably record one event; answered once its batch is on disk.
    Commit {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    /// Replace the log with a snapshot of current state.
    Rewrite {
        events: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    /// How many events were committed since the last rewrite.
    Pending { reply: oneshot::Sender<u64> },
}

/// Owns the log file. Every `Commit` that is already queued when the task
/// wakes is written with a single write and fsync. Requests are served in
/// arrival order, so a `Rewrite` never overtakes an earlier `Commit`.
async fn log_writer(mut wal: Wal, mut rx: mpsc::Receiver<LogRequest>) {
    let mut inbox = Vec::with_capacity(MAX_COMMIT_BATCH);
    while rx.recv_many(&mut inbox, MAX_COMMIT_BATCH).await > 0 {
        let mut batch = Vec::new();
        for request in inbox.drain(..) {
            match request {
                LogRequest::Commit { event, done } => batch.push((event, done)),
                LogRequest::Rewrite { events, done } => {
                    commit(&mut wal, std::mem::take(&mut batch));
                    let _ = done.send(wal.rewrite(&events));
                }
                LogRequest::Pending { reply } => {
                    commit(&mut wal, std::mem::take(&mut batch));
                    let _ = reply.send(wal.appends_since_compact());
                }
            }
        }
        commit(&mut wal, batch);
    }
}

/// Write a batch all-or-nothing and tell every waiter how it went.
fn commit(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    if batch.is_empty() {
        return;
    }
    let (events, waiters): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();

    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
    let started = std::time::Instant::now();
    let result = wal.append_batch(&events);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for done in waiters {
        let outcome = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = done.send(outcome);
    }
}

/// In-memory room and reservation state, durable through a write-ahead log.
///
/// Each room owns a `RwLock` over its state; every write to a room happens
/// under that lock, with the WAL append completing before memory is touched.
pub struct WalStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Reverse lookup: reservation id → room id
    reservation_to_room: DashMap<Ulid, Ulid>,
    /// User id → ids of every reservation that user made.
    user_reservations: DashMap<String, Vec<Ulid>>,
    /// Serializes room creation so two upserts of a new id can't race.
    room_admin: Mutex<()>,
    /// Writers hold this shared from before their log commit until the event
    /// is applied in memory. `compact` holds it exclusively, so its snapshot
    /// contains every committed event and nothing lands in the old log after
    /// the snapshot. Always taken before any room lock.
    compaction_gate: RwLock<()>,
    log_tx: mpsc::Sender<LogRequest>,
}

/// Apply a reservation event to a room (caller holds the room's write lock).
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    reservation_to_room: &DashMap<Ulid, Ulid>,
    user_reservations: &DashMap<String, Vec<Ulid>>,
) {
    match event {
        Event::RoomUpserted { room } => {
            rs.room = room.clone();
        }
        Event::ReservationCreated { reservation } => {
            reservation_to_room.insert(reservation.id, reservation.room_id);
            user_reservations
                .entry(reservation.user_id.clone())
                .or_default()
                .push(reservation.id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationCancelled {
            id, cancelled_at, ..
        } => {
            if let Some(r) = rs.get_reservation_mut(*id)
                && r.is_active()
            {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(*cancelled_at);
            }
        }
    }
}

fn event_room_id(event: &Event) -> Ulid {
    match event {
        Event::RoomUpserted { room } => room.id,
        Event::ReservationCreated { reservation } => reservation.room_id,
        Event::ReservationCancelled { room_id, .. } => *room_id,
    }
}

impl WalStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (log_tx, log_rx) = mpsc::channel(4096);
        tokio::spawn(log_writer(wal, log_rx));

        let store = Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            user_reservations: DashMap::new(),
            room_admin: Mutex::new(()),
            compaction_gate: RwLock::new(()),
            log_tx,
        };

        // We are the sole owner of these Arcs during replay, so try_write never
        // contends. Never use blocking_write here: this may run inside async code.
        for event in &events {
            let room_id = event_room_id(event);
            match (event, store.rooms.get(&room_id).map(|e| e.value().clone())) {
                (Event::RoomUpserted { room }, None) => {
                    store
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                (_, Some(rs)) => {
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| io::Error::other("replay: contended room state"))?;
                    apply_to_room(
                        &mut guard,
                        event,
                        &store.reservation_to_room,
                        &store.user_reservations,
                    );
                }
                (_, None) => {
                    debug!("replay: skipping event for unknown room {room_id}");
                }
            }
        }

        info!(
            "store opened: {} rooms, {} reservations replayed from {} events",
            store.rooms.len(),
            store.reservation_to_room.len(),
            events.len()
        );
        Ok(store)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    async fn send(&self, request: LogRequest) -> Result<()> {
        self.log_tx
            .send(request)
            .await
            .map_err(|_| Error::StorageError("log writer shut down".into()))
    }

    /// Durably record `event`. Caller holds the compaction gate.
    async fn log_event(&self, event: &Event) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(LogRequest::Commit {
            event: event.clone(),
            done,
        })
        .await?;
        rx.await
            .map_err(|_| Error::StorageError("log writer dropped response".into()))?
            .map_err(|e| Error::StorageError(e.to_string()))
    }

    /// Log, then apply. Memory is untouched if the commit fails.
    async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<()> {
        self.log_event(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room, &self.user_reservations);
        Ok(())
    }

    /// Rewrite the log as the smallest event set that rebuilds current state.
    /// Cancelled reservations are kept. Writers wait until the new log is in
    /// place.
    pub async fn compact(&self) -> Result<()> {
        let _exclusive = self.compaction_gate.write().await;

        let mut states = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            states.push((guard.room.clone(), guard.reservations.clone()));
        }
        states.sort_by_key(|(room, _)| room.id);

        let mut events = Vec::new();
        for (room, reservations) in states {
            events.push(Event::RoomUpserted { room });
            events.extend(
                reservations
                    .into_iter()
                    .map(|reservation| Event::ReservationCreated { reservation }),
            );
        }

        let (done, rx) = oneshot::channel();
        self.send(LogRequest::Rewrite { events, done }).await?;
        rx.await
            .map_err(|_| Error::StorageError("log writer dropped response".into()))?
            .map_err(|e| Error::StorageError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.send(LogRequest::Pending { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>> {
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if filter.matches(&guard.room) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn get_room(&self, id: Ulid) -> Result<Room> {
        let rs = self.get_room_state(&id).ok_or(Error::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    async fn upsert_room(&self, room: Room) -> Result<()> {
        validate_room(&room)?;
        let _admin = self.room_admin.lock().await;
        let _gate = self.compaction_gate.read().await;
        let event = Event::RoomUpserted { room: room.clone() };

        if let Some(rs) = self.get_room_state(&room.id) {
            let mut guard = rs.write().await;
            return self.persist_and_apply(&mut guard, &event).await;
        }

        if self.rooms.len() >= MAX_ROOMS {
            return Err(Error::LimitExceeded("too many rooms"));
        }
        self.log_event(&event).await?;
        info!("room created: {} ({})", room.id, room.name);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
        Ok(())
    }

    async fn list_reservations_for_room(
        &self,
        room_id: Ulid,
        include_cancelled: bool,
    ) -> Result<Vec<Reservation>> {
        let rs = self.get_room_state(&room_id).ok_or(Error::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| include_cancelled || r.is_active())
            .cloned()
            .collect())
    }

    async fn list_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
        let ids = self
            .user_reservations
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut by_room: HashMap<Ulid, Vec<Ulid>> = HashMap::new();
        for id in ids {
            if let Some(room_id) = self.reservation_to_room.get(&id).map(|e| *e.value()) {
                by_room.entry(room_id).or_default().push(id);
            }
        }

        let mut out = Vec::new();
        for (room_id, ids) in by_room {
            let Some(rs) = self.get_room_state(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| ids.contains(&r.id))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn list_active_reservations(&self) -> Result<Vec<Reservation>> {
        let mut out = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            out.extend(guard.active().cloned());
        }
        Ok(out)
    }

    async fn create_reservation(&self, data: NewReservation) -> Result<Reservation> {
        let rs = self
            .get_room_state(&data.room_id)
            .ok_or(Error::NotFound(data.room_id))?;
        let _gate = self.compaction_gate.read().await;
        let mut guard = rs.write().await;
        validate_new_reservation(&data, &guard.room)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(Error::LimitExceeded("too many reservations on room"));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room_id: data.room_id,
            user_id: data.user_id,
            user_email: data.user_email,
            span: data.span,
            purpose: data.purpose,
            attendees: data.attendees,
            status: data.status,
            created_at: now_ms(),
            cancelled_at: None,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    async fn cancel_reservation(&self, id: Ulid) -> Result<()> {
        let room_id = self
            .reservation_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(Error::NotFound(id))?;
        let rs = self.get_room_state(&room_id).ok_or(Error::NotFound(room_id))?;
        let _gate = self.compaction_gate.read().await;
        let mut guard = rs.write().await;

        let already_cancelled = guard
            .get_reservation_mut(id)
            .map(|r| !r.is_active())
            .ok_or(Error::NotFound(id))?;
        if already_cancelled {
            debug!("reservation {id} already cancelled");
            return Ok(());
        }

        let event = Event::ReservationCancelled {
            id,
            room_id,
            cancelled_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Ms = 1_767_254_400_000; // 2026-01-01T08:00:00Z

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn room(name: &str, capacity: u32) -> Room {
        Room {
            id: Ulid::new(),
            name: name.into(),
            building: "Engineering".into(),
            capacity,
            room_type: RoomType::MeetingRoom,
            equipment: ["Projector".to_string()].into_iter().collect(),
        }
    }

    fn request(room_id: Ulid, user: &str, start: Ms, end: Ms) -> NewReservation {
        NewReservation {
            room_id,
            user_id: user.into(),
            user_email: format!("{user}@example.com"),
            span: Span::new(start, end),
            purpose: "planning".into(),
            attendees: 2,
            status: ReservationStatus::Confirmed,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_room() {
        let store = WalStore::open(test_wal_path("upsert_get.wal")).unwrap();
        let mut r = room("Huddle A", 4);
        store.upsert_room(r.clone()).await.unwrap();
        assert_eq!(store.get_room(r.id).await.unwrap(), r);

        r.capacity = 6;
        store.upsert_room(r.clone()).await.unwrap();
        assert_eq!(store.get_room(r.id).await.unwrap().capacity, 6);
        assert_eq!(store.room_count(), 1);
    }

    #[tokio::test]
    async fn get_unknown_room_is_not_found() {
        let store = WalStore::open(test_wal_path("unknown_room.wal")).unwrap();
        let id = Ulid::new();
        assert!(matches!(store.get_room(id).await, Err(Error::NotFound(x)) if x == id));
        assert!(matches!(
            store.list_reservations_for_room(id, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_rooms_filters_and_orders_by_id() {
        let store = WalStore::open(test_wal_path("list_rooms.wal")).unwrap();
        let small = room("Small", 4);
        let mut big = room("Big", 40);
        big.room_type = RoomType::LectureHall;
        big.equipment = ["Audio System".to_string()].into_iter().collect();
        store.upsert_room(big.clone()).await.unwrap();
        store.upsert_room(small.clone()).await.unwrap();

        let all = store.list_rooms(&RoomFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);

        let filter = RoomFilter {
            min_capacity: Some(10),
            ..Default::default()
        };
        assert_eq!(store.list_rooms(&filter).await.unwrap(), vec![big.clone()]);

        let filter = RoomFilter {
            equipment: vec!["Projector".into(), "Document Camera".into()],
            ..Default::default()
        };
        assert_eq!(store.list_rooms(&filter).await.unwrap(), vec![small]);

        let filter = RoomFilter {
            building: Some("Nowhere".into()),
            ..Default::default()
        };
        assert!(store.list_rooms(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_assigns_id_and_created_at() {
        let store = WalStore::open(test_wal_path("create.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();

        let before = now_ms();
        let res = store
            .create_reservation(request(r.id, "alice", T0, T0 + HOUR_MS))
            .await
            .unwrap();
        assert!(res.created_at >= before);
        assert_eq!(res.status, ReservationStatus::Confirmed);
        assert_eq!(res.cancelled_at, None);

        let listed = store.list_reservations_for_room(r.id, false).await.unwrap();
        assert_eq!(listed, vec![res]);
    }

    #[tokio::test]
    async fn create_rejects_invalid_data_without_writing() {
        let store = WalStore::open(test_wal_path("create_invalid.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();

        let mut req = request(r.id, "alice", T0, T0 + HOUR_MS);
        req.attendees = 5;
        assert!(matches!(
            store.create_reservation(req).await,
            Err(Error::InvalidAttendeeCount { attendees: 5, capacity: 4 })
        ));

        let mut req = request(r.id, "alice", T0, T0 + HOUR_MS);
        req.purpose = String::new();
        assert!(matches!(
            store.create_reservation(req).await,
            Err(Error::ValidationError(_))
        ));

        assert!(matches!(
            store
                .create_reservation(request(Ulid::new(), "alice", T0, T0 + HOUR_MS))
                .await,
            Err(Error::NotFound(_))
        ));

        assert!(store.list_reservations_for_room(r.id, true).await.unwrap().is_empty());
        assert!(store.list_reservations_for_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_does_not_check_overlap() {
        let store = WalStore::open(test_wal_path("create_overlap.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();
        store
            .create_reservation(request(r.id, "alice", T0, T0 + HOUR_MS))
            .await
            .unwrap();
        store
            .create_reservation(request(r.id, "bob", T0, T0 + HOUR_MS))
            .await
            .unwrap();
        assert_eq!(store.list_active_reservations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn room_reservations_sorted_ascending() {
        let store = WalStore::open(test_wal_path("room_sorted.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();
        for h in [3, 1, 2] {
            store
                .create_reservation(request(r.id, "alice", T0 + h * HOUR_MS, T0 + (h + 1) * HOUR_MS))
                .await
                .unwrap();
        }
        let starts: Vec<Ms> = store
            .list_reservations_for_room(r.id, false)
            .await
            .unwrap()
            .iter()
            .map(|r| r.span.start)
            .collect();
        assert_eq!(starts, vec![T0 + HOUR_MS, T0 + 2 * HOUR_MS, T0 + 3 * HOUR_MS]);
    }

    #[tokio::test]
    async fn user_reservations_sorted_descending_across_rooms() {
        let store = WalStore::open(test_wal_path("user_sorted.wal")).unwrap();
        let a = room("A", 4);
        let b = room("B", 4);
        store.upsert_room(a.clone()).await.unwrap();
        store.upsert_room(b.clone()).await.unwrap();

        store
            .create_reservation(request(a.id, "carol", T0, T0 + HOUR_MS))
            .await
            .unwrap();
        store
            .create_reservation(request(b.id, "carol", T0 + 5 * HOUR_MS, T0 + 6 * HOUR_MS))
            .await
            .unwrap();
        store
            .create_reservation(request(a.id, "carol", T0 + 2 * HOUR_MS, T0 + 3 * HOUR_MS))
            .await
            .unwrap();
        store
            .create_reservation(request(a.id, "dave", T0 + 8 * HOUR_MS, T0 + 9 * HOUR_MS))
            .await
            .unwrap();

        let mine = store.list_reservations_for_user("carol").await.unwrap();
        let starts: Vec<Ms> = mine.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![T0 + 5 * HOUR_MS, T0 + 2 * HOUR_MS, T0]);
        assert!(mine.iter().all(|r| r.user_id == "carol"));
        assert!(store.list_reservations_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_marks_and_keeps_record() {
        let store = WalStore::open(test_wal_path("cancel.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();
        let res = store
            .create_reservation(request(r.id, "alice", T0, T0 + HOUR_MS))
            .await
            .unwrap();

        store.cancel_reservation(res.id).await.unwrap();

        assert!(store.list_reservations_for_room(r.id, false).await.unwrap().is_empty());
        let all = store.list_reservations_for_room(r.id, true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ReservationStatus::Cancelled);
        assert!(all[0].cancelled_at.is_some());
        // Still visible in the user's history.
        assert_eq!(store.list_reservations_for_user("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_twice_is_noop() {
        let store = WalStore::open(test_wal_path("cancel_twice.wal")).unwrap();
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();
        let res = store
            .create_reservation(request(r.id, "alice", T0, T0 + HOUR_MS))
            .await
            .unwrap();

        store.cancel_reservation(res.id).await.unwrap();
        let first = store.list_reservations_for_room(r.id, true).await.unwrap()[0].cancelled_at;
        let appends = store.wal_appends_since_compact().await;

        store.cancel_reservation(res.id).await.unwrap();
        let second = store.list_reservations_for_room(r.id, true).await.unwrap()[0].cancelled_at;
        assert_eq!(first, second);
        assert_eq!(store.wal_appends_since_compact().await, appends);
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let store = WalStore::open(test_wal_path("cancel_unknown.wal")).unwrap();
        let id = Ulid::new();
        assert!(matches!(store.cancel_reservation(id).await, Err(Error::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let r = room("A", 4);
        let (kept, cancelled) = {
            let store = WalStore::open(path.clone()).unwrap();
            store.upsert_room(r.clone()).await.unwrap();
            let kept = store
                .create_reservation(request(r.id, "alice", T0, T0 + HOUR_MS))
                .await
                .unwrap();
            let cancelled = store
                .create_reservation(request(r.id, "bob", T0 + HOUR_MS, T0 + 2 * HOUR_MS))
                .await
                .unwrap();
            store.cancel_reservation(cancelled.id).await.unwrap();
            (kept, cancelled)
        };

        let store = WalStore::open(path).unwrap();
        assert_eq!(store.get_room(r.id).await.unwrap(), r);
        assert_eq!(
            store.list_reservations_for_room(r.id, false).await.unwrap(),
            vec![kept]
        );
        let bob = store.list_reservations_for_user("bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].id, cancelled.id);
        assert_eq!(bob[0].status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn compact_preserves_state() {
        let path = test_wal_path("compact.wal");
        let r = room("A", 4);
        {
            let store = WalStore::open(path.clone()).unwrap();
            store.upsert_room(r.clone()).await.unwrap();
            for i in 0..5 {
                let res = store
                    .create_reservation(request(r.id, "alice", T0 + i * HOUR_MS, T0 + (i + 1) * HOUR_MS))
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    store.cancel_reservation(res.id).await.unwrap();
                }
            }
            // Capacity edits churn the log.
            for cap in 5..10 {
                let mut r2 = r.clone();
                r2.capacity = cap;
                store.upsert_room(r2).await.unwrap();
            }
            assert!(store.wal_appends_since_compact().await > 0);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
        }

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 6);

        let store = WalStore::open(path).unwrap();
        assert_eq!(store.get_room(r.id).await.unwrap().capacity, 9);
        assert_eq!(store.list_reservations_for_room(r.id, false).await.unwrap().len(), 2);
        assert_eq!(store.list_reservations_for_room(r.id, true).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn cancel_during_compaction_survives_restart() {
        let path = test_wal_path("compact_race.wal");
        let store = Arc::new(WalStore::open(path.clone()).unwrap());
        let a = room("A", 4);
        let b = room("B", 4);
        store.upsert_room(a.clone()).await.unwrap();
        store.upsert_room(b.clone()).await.unwrap();
        let first = store
            .create_reservation(request(a.id, "alice", T0, T0 + HOUR_MS))
            .await
            .unwrap();

        // Stall the snapshot on room B, possibly after A was already read.
        let b_state = store.get_room_state(&b.id).unwrap();
        let stalled = b_state.write().await;
        let compaction = tokio::spawn({
            let store = store.clone();
            async move { store.compact().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let cancel = tokio::spawn({
            let store = store.clone();
            async move { store.cancel_reservation(first.id).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!cancel.is_finished(), "writers wait for the compaction");

        drop(stalled);
        compaction.await.unwrap().unwrap();
        cancel.await.unwrap().unwrap();

        let second = store
            .create_reservation(request(a.id, "bob", T0, T0 + HOUR_MS))
            .await
            .unwrap();
        drop(store);

        let reopened = WalStore::open(path).unwrap();
        let active = reopened.list_reservations_for_room(a.id, false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        let all = reopened.list_reservations_for_room(a.id, true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_commits_share_batches_and_replay() {
        let path = test_wal_path("batched.wal");
        let store = Arc::new(WalStore::open(path.clone()).unwrap());
        let r = room("A", 4);
        store.upsert_room(r.clone()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let room_id = r.id;
            handles.push(tokio::spawn(async move {
                store
                    .create_reservation(request(
                        room_id,
                        "alice",
                        T0 + i * HOUR_MS,
                        T0 + (i + 1) * HOUR_MS,
                    ))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 33);
        drop(store);

        let reopened = WalStore::open(path).unwrap();
        assert_eq!(reopened.list_reservations_for_room(r.id, false).await.unwrap().len(), 32);
    }
}
