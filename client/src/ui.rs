use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use crate::users::User;
use crate::utils::format_time;

/// A line of feedback for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    /// Keep it in the log/console only, off the player's OSD.
    pub hide_from_osd: bool,
}

impl Notice {
    pub fn new(text: impl Into<String>, hide_from_osd: bool) -> Self {
        Self {
            text: text.into(),
            hide_from_osd,
        }
    }

    pub fn quiet(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }
}

/// Front end the client reports to.
pub trait Ui: Send {
    fn show_message(&mut self, text: &str, hide_from_osd: bool);

    fn show_error_message(&mut self, text: &str, critical: bool);

    fn show_user_list(&mut self, current: &User, rooms: &BTreeMap<String, Vec<User>>);

    fn prompt_for(&mut self, prompt: &str) -> Option<String>;
}

/// Plain terminal front end.
#[derive(Debug, Default)]
pub struct ConsoleUi;

impl ConsoleUi {
    pub fn new() -> Self {
        Self
    }

    fn render_user(user: &User, current: &User) -> String {
        let marker = if user.username == current.username { "*" } else { " " };
        match &user.file {
            Some(file) => format!(
                "{marker}<{}> {} ({})",
                user.username,
                file.name,
                format_time(file.duration)
            ),
            None => format!("{marker}<{}>", user.username),
        }
    }
}

impl Ui for ConsoleUi {
    fn show_message(&mut self, text: &str, _hide_from_osd: bool) {
        tracing::info!("{}", text);
        println!("{text}");
    }

    fn show_error_message(&mut self, text: &str, critical: bool) {
        if critical {
            tracing::error!("{}", text);
        } else {
            tracing::warn!("{}", text);
        }
        eprintln!("ERROR: {text}");
    }

    fn show_user_list(&mut self, current: &User, rooms: &BTreeMap<String, Vec<User>>) {
        println!("Userlist:");
        for (room, users) in rooms {
            println!("In room '{room}':");
            for user in users {
                println!("  {}", Self::render_user(user, current));
            }
        }
    }

    fn prompt_for(&mut self, prompt: &str) -> Option<String> {
        print!("{prompt}: ");
        io::stdout().flush().ok()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}
