use lockstep_protocol::SharedClock;
use std::path::{Path, PathBuf};

/// What the player reported when asked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerStatus {
    pub paused: bool,
    pub position: f64,
}

/// Media player driver.
///
/// `ask_for_status` may fail while the player is busy or not ready yet; the
/// client just skips that poll.
pub trait Player: Send {
    fn ask_for_status(&mut self) -> Result<PlayerStatus, String>;

    fn set_paused(&mut self, paused: bool) -> Result<(), String>;

    fn set_position(&mut self, position: f64) -> Result<(), String>;

    fn set_speed(&mut self, speed: f64) -> Result<(), String>;

    fn speed_supported(&self) -> bool {
        true
    }

    fn open_file(&mut self, path: &Path) -> Result<(), String>;

    fn display_message(&mut self, text: &str, duration_ms: u64);
}

/// A player with no output that advances its position by wall-clock time
/// and speed. Lets the client run headless as a synchronized participant.
#[derive(Debug)]
pub struct VirtualPlayer {
    clock: SharedClock,
    file: Option<PathBuf>,
    duration: Option<f64>,
    position: f64,
    paused: bool,
    speed: f64,
    updated_at: f64,
    last_osd: Option<String>,
}

impl VirtualPlayer {
    pub fn new(clock: SharedClock) -> Self {
        let updated_at = clock.now();
        Self {
            clock,
            file: None,
            duration: None,
            position: 0.0,
            paused: true,
            speed: 1.0,
            updated_at,
            last_osd: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = (duration > 0.0).then_some(duration);
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn last_osd(&self) -> Option<&str> {
        self.last_osd.as_deref()
    }

    /// Fold elapsed time into the stored position. Playback stops at the
    /// end of the file.
    fn advance(&mut self) {
        let now = self.clock.now();
        if !self.paused {
            self.position += (now - self.updated_at) * self.speed;
            if let Some(duration) = self.duration {
                if self.position >= duration {
                    self.position = duration;
                    self.paused = true;
                }
            }
        }
        self.updated_at = now;
    }
}

impl Player for VirtualPlayer {
    fn ask_for_status(&mut self) -> Result<PlayerStatus, String> {
        self.advance();
        Ok(PlayerStatus {
            paused: self.paused,
            position: self.position,
        })
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), String> {
        self.advance();
        self.paused = paused;
        Ok(())
    }

    fn set_position(&mut self, position: f64) -> Result<(), String> {
        if !position.is_finite() {
            return Err(format!("Invalid position {position}"));
        }
        self.advance();
        self.position = match self.duration {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        };
        Ok(())
    }

    fn set_speed(&mut self, speed: f64) -> Result<(), String> {
        if speed <= 0.0 || !speed.is_finite() {
            return Err(format!("Invalid speed {speed}"));
        }
        self.advance();
        self.speed = speed;
        Ok(())
    }

    fn open_file(&mut self, path: &Path) -> Result<(), String> {
        self.file = Some(path.to_path_buf());
        self.position = 0.0;
        self.paused = true;
        self.updated_at = self.clock.now();
        Ok(())
    }

    fn display_message(&mut self, text: &str, duration_ms: u64) {
        tracing::debug!(duration_ms, "OSD: {}", text);
        self.last_osd = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_protocol::ManualClock;

    #[test]
    fn position_follows_clock_and_speed() {
        let clock = ManualClock::new(0.0);
        let mut player = VirtualPlayer::new(clock.clone());
        player.set_paused(false).unwrap();
        clock.advance(10.0);
        assert_eq!(player.ask_for_status().unwrap().position, 10.0);

        player.set_speed(0.5).unwrap();
        clock.advance(4.0);
        assert_eq!(player.ask_for_status().unwrap().position, 12.0);

        player.set_paused(true).unwrap();
        clock.advance(100.0);
        assert_eq!(player.ask_for_status().unwrap().position, 12.0);
    }

    #[test]
    fn stops_at_end_of_file() {
        let clock = ManualClock::new(0.0);
        let mut player = VirtualPlayer::new(clock.clone()).with_duration(30.0);
        player.set_position(25.0).unwrap();
        player.set_paused(false).unwrap();
        clock.advance(10.0);
        let status = player.ask_for_status().unwrap();
        assert_eq!(status.position, 30.0);
        assert!(status.paused);
    }

    #[test]
    fn rejects_nonsense() {
        let clock = ManualClock::new(0.0);
        let mut player = VirtualPlayer::new(clock);
        assert!(player.set_speed(0.0).is_err());
        assert!(player.set_position(f64::NAN).is_err());
        player.set_position(-3.0).unwrap();
        assert_eq!(player.ask_for_status().unwrap().position, 0.0);
    }
}
