//! Message of the day.
//!
//! Templates use `$name` / `${name}` placeholders, with `$$` for a literal
//! dollar sign. Known placeholders: `$version`, `$userIp`, `$username`,
//! `$room`.

use lockstep_protocol::constants::SERVER_MAX_TEMPLATE_LENGTH;
use std::path::Path;

const LOG_TAG: &str = "[Lockstep Server]";

#[derive(Debug, Clone, Copy)]
pub struct MotdContext<'a> {
    pub version: &'a str,
    pub user_ip: &'a str,
    pub username: &'a str,
    pub room: &'a str,
}

impl MotdContext<'_> {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "version" => Some(self.version),
            "userIp" => Some(self.user_ip),
            "username" => Some(self.username),
            "room" => Some(self.room),
            _ => None,
        }
    }
}

/// Read and render the MOTD file. A missing path or unreadable file gives
/// an empty MOTD.
pub fn load_motd(path: Option<&Path>, context: &MotdContext<'_>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    match std::fs::read_to_string(path) {
        Ok(template) => render_motd(template.trim_start_matches('\u{feff}'), context),
        Err(e) => {
            tracing::warn!("{LOG_TAG} Failed to read MOTD file {}: {}", path.display(), e);
            String::new()
        }
    }
}

pub fn render_motd(template: &str, context: &MotdContext<'_>) -> String {
    match substitute(template, context) {
        Some(motd) if motd.chars().count() < SERVER_MAX_TEMPLATE_LENGTH => motd,
        Some(motd) => format!(
            "Message of the Day is too long - maximum of {} chars, {} given.",
            SERVER_MAX_TEMPLATE_LENGTH,
            motd.chars().count()
        ),
        None => {
            "Message of the Day has unescaped placeholders. All $ signs should be doubled ($$)."
                .to_string()
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// `None` on a dangling `$` or a placeholder we have no value for.
fn substitute(template: &str, context: &MotdContext<'_>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        c => key.push(c),
                    }
                }
                let valid = key.chars().next().is_some_and(is_identifier_start)
                    && key.chars().all(is_identifier_char);
                if !valid {
                    return None;
                }
                out.push_str(context.lookup(&key)?);
            }
            Some(c) if is_identifier_start(c) => {
                let mut key = String::new();
                while let Some(c) = chars.peek().copied().filter(|c| is_identifier_char(*c)) {
                    key.push(c);
                    chars.next();
                }
                out.push_str(context.lookup(&key)?);
            }
            _ => return None,
        }
    }
    Some(out)
}
