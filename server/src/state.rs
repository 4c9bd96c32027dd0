use dashmap::DashMap;
use lockstep_protocol::messages::{ListedUser, UserEvent, UserListing};
use lockstep_protocol::{FileInfo, SetMessage, SharedClock};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{RoomMode, ServerConfig};
use crate::room::{ReportedPlaystate, Room, RoomSnapshot, Watcher, WatcherEvent, WatcherSender};

const LOG_TAG: &str = "[Lockstep Server]";

/// Directory entry for a logged-in watcher.
#[derive(Debug, Clone)]
struct Member {
    name: String,
    room: String,
    tx: WatcherSender,
}

/// Shared server state
///
/// Rooms are independent and each sits behind its own lock. Anything that
/// changes membership (join, move, leave) goes through the `membership`
/// coordinator so usernames stay unique and rooms are created and deleted
/// consistently. No code path holds two room locks at once.
#[derive(Clone)]
pub struct ServerState {
    /// All active rooms: room name -> Room
    rooms: Arc<DashMap<String, Arc<Mutex<Room>>>>,
    /// All logged-in watchers: watcher id -> Member
    members: Arc<DashMap<Uuid, Member>>,
    membership: Arc<Mutex<()>>,
    config: Arc<ServerConfig>,
    clock: SharedClock,
}

impl ServerState {
    pub fn new(config: ServerConfig, clock: SharedClock) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            members: Arc::new(DashMap::new()),
            membership: Arc::new(Mutex::new(())),
            config: Arc::new(config),
            clock,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.members.len()
    }

    pub fn watcher_room(&self, id: &Uuid) -> Option<String> {
        self.members.get(id).map(|member| member.room.clone())
    }

    /// Register a freshly logged-in watcher and place it in `room_name`.
    /// Returns the username it ended up with.
    pub fn add_watcher(
        &self,
        id: Uuid,
        username: &str,
        room_name: &str,
        tx: WatcherSender,
    ) -> String {
        let _guard = self.membership.lock();
        let name = self.free_username(username, room_name);
        let now = self.now();

        self.members.insert(
            id,
            Member {
                name: name.clone(),
                room: room_name.to_string(),
                tx: tx.clone(),
            },
        );
        let room = self.room_or_create(room_name);
        room.lock()
            .add_watcher(Watcher::new(id, name.clone(), now, tx), now);

        tracing::info!("{LOG_TAG} {} joined room {}", name, room_name);
        let joined = SetMessage::user(&name, room_name, None, Some(UserEvent::joined()));
        self.broadcast(room_name, Some(id), |tx| {
            let _ = tx.send(WatcherEvent::Set(joined.clone()));
        });
        self.send_room_state(&room, &id, true);
        name
    }

    /// Move a watcher to another room, creating it if needed.
    pub fn set_watcher_room(&self, id: &Uuid, room_name: &str) {
        let _guard = self.membership.lock();
        let Some(member) = self.members.get(id).map(|member| member.value().clone()) else {
            return;
        };
        let now = self.now();
        let isolated = self.config.room_mode == RoomMode::Isolated;

        if isolated {
            let left = SetMessage::user(&member.name, &member.room, None, Some(UserEvent::left()));
            self.broadcast(&member.room, Some(*id), |tx| {
                let _ = tx.send(WatcherEvent::Set(left.clone()));
            });
        }

        let watcher = self.take_watcher(&member.room, id);
        let file = watcher.as_ref().and_then(|watcher| watcher.file().cloned());
        let mut watcher =
            watcher.unwrap_or_else(|| Watcher::new(*id, member.name.clone(), now, member.tx.clone()));

        let room = self.room_or_create(room_name);
        {
            let mut room = room.lock();
            // Positions belong to the old room; the newcomer is seeded fresh.
            if !room.is_empty() {
                watcher.set_position(room.position(now));
            }
            room.add_watcher(watcher, now);
        }
        if let Some(mut entry) = self.members.get_mut(id) {
            entry.room = room_name.to_string();
        }

        tracing::info!(
            "{LOG_TAG} {} moved from room {} to {}",
            member.name,
            member.room,
            room_name
        );
        let announce_file = if isolated { file } else { None };
        let moved = SetMessage::user(&member.name, room_name, announce_file, None);
        self.broadcast(room_name, Some(*id), |tx| {
            let _ = tx.send(WatcherEvent::Set(moved.clone()));
        });
        self.send_room_state(&room, id, true);
    }

    pub fn remove_watcher(&self, id: &Uuid) {
        let _guard = self.membership.lock();
        let Some((_, member)) = self.members.remove(id) else {
            return;
        };
        let _ = self.take_watcher(&member.room, id);

        tracing::info!("{LOG_TAG} {} left room {}", member.name, member.room);
        let left = SetMessage::user(&member.name, &member.room, None, Some(UserEvent::left()));
        self.broadcast(&member.room, Some(*id), |tx| {
            let _ = tx.send(WatcherEvent::Set(left.clone()));
        });
    }

    pub fn set_file(&self, id: &Uuid, file: FileInfo) {
        let Some(member) = self.members.get(id).map(|member| member.value().clone()) else {
            return;
        };
        let Some(room) = self.room(&member.room) else {
            return;
        };
        if let Some(watcher) = room.lock().watcher_mut(id) {
            watcher.set_file(Some(file.clone()));
        }

        tracing::info!("{LOG_TAG} {} is playing {}", member.name, file.name);
        let update = SetMessage::user(&member.name, &member.room, Some(file), None);
        self.broadcast(&member.room, Some(*id), |tx| {
            let _ = tx.send(WatcherEvent::Set(update.clone()));
        });
    }

    /// Apply a watcher's state report to its room.
    pub fn update_state(
        &self,
        id: &Uuid,
        report: Option<ReportedPlaystate>,
        message_age: f64,
    ) -> bool {
        let Some(room) = self.room_of(id) else {
            return false;
        };
        let now = self.now();
        let mut room = room.lock();
        room.update_state(id, report, message_age, now)
    }

    pub fn room_snapshot(&self, id: &Uuid) -> Option<RoomSnapshot> {
        let room = self.room_of(id)?;
        let now = self.now();
        let mut room = room.lock();
        room.snapshot(id, now)
    }

    /// Rooms and users visible to `id`: every room in global mode, only its
    /// own room when rooms are isolated.
    pub fn user_list(&self, id: &Uuid) -> UserListing {
        let own_room = self.watcher_room(id);
        let rooms: Vec<Arc<Mutex<Room>>> = match (self.config.room_mode, own_room) {
            (RoomMode::Isolated, Some(name)) => self.room(&name).into_iter().collect(),
            (RoomMode::Isolated, None) => Vec::new(),
            (RoomMode::Global, _) => self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect(),
        };

        let mut listing = UserListing::new();
        for room in rooms {
            let room = room.lock();
            let users: BTreeMap<String, ListedUser> = room
                .watchers()
                .map(|watcher| {
                    (
                        watcher.name().to_string(),
                        ListedUser {
                            position: 0.0,
                            file: watcher.file().cloned(),
                        },
                    )
                })
                .collect();
            listing.insert(room.name().to_string(), users);
        }
        listing
    }

    fn room(&self, name: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(name).map(|room| Arc::clone(room.value()))
    }

    fn room_of(&self, id: &Uuid) -> Option<Arc<Mutex<Room>>> {
        let name = self.watcher_room(id)?;
        self.room(&name)
    }

    fn room_or_create(&self, name: &str) -> Arc<Mutex<Room>> {
        let room = self.rooms.entry(name.to_string()).or_insert_with(|| {
            tracing::info!("{LOG_TAG} Room {} created", name);
            Arc::new(Mutex::new(Room::new(name)))
        });
        Arc::clone(room.value())
    }

    /// Remove a watcher from its room, deleting the room once empty.
    /// Caller holds the membership lock.
    fn take_watcher(&self, room_name: &str, id: &Uuid) -> Option<Watcher> {
        let room = self.room(room_name)?;
        let (watcher, now_empty) = {
            let mut room = room.lock();
            let watcher = room.remove_watcher(id);
            (watcher, room.is_empty())
        };
        if now_empty {
            self.rooms.remove(room_name);
            tracing::info!("{LOG_TAG} Room {} deleted (empty)", room_name);
        }
        watcher
    }

    /// Case-insensitive, scoped by room mode. Caller holds the membership lock.
    fn free_username(&self, username: &str, room_name: &str) -> String {
        let isolated = self.config.room_mode == RoomMode::Isolated;
        let taken: Vec<String> = self
            .members
            .iter()
            .filter(|member| !isolated || member.room == room_name)
            .map(|member| member.name.to_lowercase())
            .collect();

        let mut name = username.to_string();
        while taken.contains(&name.to_lowercase()) {
            name.push('_');
        }
        name
    }

    fn send_room_state(&self, room: &Arc<Mutex<Room>>, id: &Uuid, do_seek: bool) {
        let now = self.now();
        let snapshot = room.lock().snapshot(id, now);
        let (Some(snapshot), Some(member)) = (snapshot, self.members.get(id)) else {
            return;
        };
        let _ = member.tx.send(WatcherEvent::State {
            position: snapshot.position,
            paused: snapshot.paused,
            do_seek,
            set_by: snapshot.set_by,
            forced: true,
        });
    }

    /// Deliver to everyone in scope of `room_name`, except `exclude`.
    fn broadcast(&self, room_name: &str, exclude: Option<Uuid>, send: impl Fn(&WatcherSender)) {
        let isolated = self.config.room_mode == RoomMode::Isolated;
        let recipients: Vec<WatcherSender> = self
            .members
            .iter()
            .filter(|member| Some(*member.key()) != exclude)
            .filter(|member| !isolated || member.room == room_name)
            .map(|member| member.tx.clone())
            .collect();
        for tx in &recipients {
            send(tx);
        }
    }
}
