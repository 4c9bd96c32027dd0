//! Who else is on the server, as far as this client knows.

use lockstep_protocol::constants::{
    DIFFERENT_DURATION_THRESHOLD, SHOW_DIFFERENT_ROOM_OSD, SHOW_SAME_ROOM_OSD,
};
use lockstep_protocol::messages::UserListing;
use lockstep_protocol::FileInfo;
use std::collections::BTreeMap;

use crate::ui::Notice;
use crate::utils::format_time;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub room: Option<String>,
    pub file: Option<FileInfo>,
}

impl User {
    pub fn new(username: impl Into<String>, room: Option<String>, file: Option<FileInfo>) -> Self {
        Self {
            username: username.into(),
            room,
            file,
        }
    }

    /// Whether `file` looks like the one this user is playing. A user with
    /// no file matches nothing.
    pub fn is_file_same(&self, file: &FileInfo) -> bool {
        self.file
            .as_ref()
            .is_some_and(|own| own.is_same(file, DIFFERENT_DURATION_THRESHOLD))
    }
}

#[derive(Debug)]
pub struct UserList {
    current: User,
    users: BTreeMap<String, User>,
    room_users_changed: bool,
}

impl UserList {
    pub fn new(username: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            current: User::new(username, Some(room.into()), None),
            users: BTreeMap::new(),
            room_users_changed: true,
        }
    }

    pub fn current(&self) -> &User {
        &self.current
    }

    pub fn set_current_username(&mut self, username: impl Into<String>) {
        self.current.username = username.into();
    }

    pub fn set_current_room(&mut self, room: impl Into<String>) {
        self.current.room = Some(room.into());
        self.room_users_changed = true;
    }

    pub fn set_current_file(&mut self, file: Option<FileInfo>) {
        self.current.file = file;
        self.room_users_changed = true;
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn is_room_same(&self, room: Option<&str>) -> bool {
        match (room, self.current.room.as_deref()) {
            (Some(room), Some(current)) => room == current,
            _ => false,
        }
    }

    fn hide_from_osd(&self, room: Option<&str>, old_room: Option<&str>) -> bool {
        let show = if self.is_room_same(room) || self.is_room_same(old_room) {
            SHOW_SAME_ROOM_OSD
        } else {
            SHOW_DIFFERENT_ROOM_OSD
        };
        !show
    }

    fn change_notices(
        &self,
        username: &str,
        room: Option<&str>,
        file: Option<&FileInfo>,
        old_room: Option<&str>,
    ) -> Vec<Notice> {
        let Some(room) = room else {
            return Vec::new();
        };
        let hide = self.hide_from_osd(Some(room), old_room);
        let mut notices = Vec::new();

        let Some(file) = file else {
            notices.push(Notice::new(
                format!("{username} has joined the room: '{room}'"),
                hide,
            ));
            return notices;
        };

        let mut playing = format!(
            "{username} is playing '{}' ({})",
            file.name,
            format_time(file.duration)
        );
        if self.current.room.as_deref() != Some(room) || self.current.username == username {
            playing.push_str(&format!(" in room: '{room}'"));
        }
        notices.push(Notice::new(playing, hide));

        if let Some(own) = &self.current.file {
            if self.current.room.as_deref() == Some(room) && !self.current.is_file_same(file) {
                notices.push(Notice::new(
                    format!("File you are playing appears to be different from {username}'s"),
                    hide,
                ));
                let differences = own.differences(file, DIFFERENT_DURATION_THRESHOLD);
                notices.push(Notice::new(
                    format!(
                        "Your file differs in the following way(s): {}",
                        differences.join(", ")
                    ),
                    hide,
                ));
            }
        }
        notices
    }

    pub fn add_user(
        &mut self,
        username: &str,
        room: Option<String>,
        file: Option<FileInfo>,
        announce: bool,
    ) -> Vec<Notice> {
        if username == self.current.username {
            return Vec::new();
        }
        let notices = if announce {
            self.change_notices(username, room.as_deref(), file.as_ref(), None)
        } else {
            Vec::new()
        };
        self.user_list_change(room.as_deref());
        self.users
            .insert(username.to_string(), User::new(username, room, file));
        notices
    }

    pub fn mod_user(
        &mut self,
        username: &str,
        room: Option<String>,
        file: Option<FileInfo>,
    ) -> Vec<Notice> {
        let Some(user) = self.users.get(username) else {
            if username == self.current.username {
                if let Some(room) = room {
                    self.set_current_room(room);
                }
                return Vec::new();
            }
            return self.add_user(username, room, file, true);
        };

        let old_room = user.room.clone();
        let notices = match (&file, &room) {
            (Some(file), _) if !user.is_file_same(file) => self.change_notices(
                username,
                room.as_deref().or(old_room.as_deref()),
                Some(file),
                old_room.as_deref(),
            ),
            (_, Some(room)) if Some(room) != old_room.as_ref() => {
                self.change_notices(username, Some(room.as_str()), None, old_room.as_deref())
            }
            _ => Vec::new(),
        };

        if self.is_room_same(old_room.as_deref()) {
            self.room_users_changed = true;
        }
        self.user_list_change(room.as_deref());
        if let Some(user) = self.users.get_mut(username) {
            if let Some(room) = room {
                user.room = Some(room);
            }
            if let Some(file) = file {
                user.file = Some(file);
            }
        }
        notices
    }

    pub fn remove_user(&mut self, username: &str) -> Vec<Notice> {
        let Some(user) = self.users.remove(username) else {
            return Vec::new();
        };
        let hide = if self.is_room_same(user.room.as_deref()) {
            !SHOW_SAME_ROOM_OSD
        } else {
            !SHOW_DIFFERENT_ROOM_OSD
        };
        self.user_list_change(user.room.as_deref());
        vec![Notice::new(format!("{username} has left"), hide)]
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.room_users_changed = true;
    }

    /// Replace everything with a server listing.
    pub fn load_listing(&mut self, listing: &UserListing) {
        self.clear();
        for (room, users) in listing {
            for (username, listed) in users {
                self.add_user(username, Some(room.clone()), listed.file.clone(), false);
            }
        }
    }

    pub fn are_all_files_in_room_same(&self) -> bool {
        self.users
            .values()
            .filter(|user| user.room == self.current.room)
            .filter_map(|user| user.file.as_ref())
            .all(|file| self.current.is_file_same(file))
    }

    pub fn are_you_alone_in_room(&self) -> bool {
        !self
            .users
            .values()
            .any(|user| user.room == self.current.room)
    }

    pub fn is_user_in_your_room(&self, username: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|user| user.room == self.current.room)
    }

    pub fn has_room_state_changed(&self) -> bool {
        self.room_users_changed
    }

    pub fn room_state_confirmed(&mut self) {
        self.room_users_changed = false;
    }

    fn user_list_change(&mut self, room: Option<&str>) {
        if self.is_room_same(room) {
            self.room_users_changed = true;
        }
    }

    /// Everyone grouped by room, current user included.
    pub fn rooms(&self) -> BTreeMap<String, Vec<User>> {
        let mut rooms: BTreeMap<String, Vec<User>> = BTreeMap::new();
        for user in self.users.values().chain(std::iter::once(&self.current)) {
            let room = user.room.clone().unwrap_or_default();
            rooms.entry(room).or_default().push(user.clone());
        }
        for users in rooms.values_mut() {
            users.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
        }
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::files::hash_filename;
    use lockstep_protocol::messages::ListedUser;

    fn movie() -> FileInfo {
        FileInfo::new("My Movie.mkv", 5400.0, 1000)
    }

    fn list() -> UserList {
        let mut users = UserList::new("me", "cinema");
        users.set_current_file(Some(movie()));
        users.room_state_confirmed();
        users
    }

    #[test]
    fn join_and_play_notices() {
        let mut users = list();
        let notices = users.add_user("bob", Some("cinema".into()), None, true);
        assert_eq!(notices, vec![Notice::new("bob has joined the room: 'cinema'", false)]);
        assert!(users.has_room_state_changed());

        let notices = users.mod_user("bob", None, Some(movie()));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].text, "bob is playing 'My Movie.mkv' (01:30:00)");

        let notices = users.add_user("carol", Some("lobby".into()), Some(movie()), true);
        assert!(notices[0].text.ends_with(" in room: 'lobby'"));
        assert!(notices[0].hide_from_osd);
    }

    #[test]
    fn different_file_is_explained() {
        let mut users = list();
        let other = FileInfo::new("Other.mkv", 100.0, 1000);
        let notices = users.add_user("bob", Some("cinema".into()), Some(other), true);
        let texts: Vec<&str> = notices.iter().map(|notice| notice.text.as_str()).collect();
        assert_eq!(texts[1], "File you are playing appears to be different from bob's");
        assert_eq!(texts[2], "Your file differs in the following way(s): name, duration");
        assert!(!users.are_all_files_in_room_same());
    }

    #[test]
    fn hashed_names_still_match() {
        let mut users = list();
        let hashed = FileInfo {
            name: hash_filename("My Movie.mkv"),
            ..movie()
        };
        users.add_user("bob", Some("cinema".into()), Some(hashed), false);
        assert!(users.are_all_files_in_room_same());
    }

    #[test]
    fn alone_and_membership() {
        let mut users = list();
        assert!(users.are_you_alone_in_room());
        users.add_user("bob", Some("lobby".into()), None, false);
        assert!(users.are_you_alone_in_room());
        assert!(!users.is_user_in_your_room("bob"));

        users.mod_user("bob", Some("cinema".into()), None);
        assert!(!users.are_you_alone_in_room());
        assert!(users.is_user_in_your_room("bob"));

        let notices = users.remove_user("bob");
        assert_eq!(notices, vec![Notice::new("bob has left", false)]);
        assert!(users.are_you_alone_in_room());
        assert!(users.remove_user("bob").is_empty());
    }

    #[test]
    fn own_name_is_never_listed() {
        let mut users = list();
        assert!(users.add_user("me", Some("cinema".into()), None, true).is_empty());
        assert!(users.is_empty());
    }

    #[test]
    fn listing_replaces_known_users() {
        let mut users = list();
        users.add_user("ghost", Some("cinema".into()), None, false);
        let listing = UserListing::from([(
            "cinema".to_string(),
            BTreeMap::from([
                ("me".to_string(), ListedUser::default()),
                (
                    "bob".to_string(),
                    ListedUser {
                        position: 0.0,
                        file: Some(movie()),
                    },
                ),
            ]),
        )]);
        users.load_listing(&listing);
        assert_eq!(users.len(), 1);
        assert!(users.user("bob").is_some());

        let rooms = users.rooms();
        let names: Vec<&str> = rooms["cinema"].iter().map(|user| user.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "me"]);
    }
}
