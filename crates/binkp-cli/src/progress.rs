//! Transfer progress display driven by session events.

use binkp_core::SessionEvent;
use binkp_core::session::EventReceiver;
use binkp_files::Direction;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const TEMPLATE: &str = "{prefix:>4} {msg:20!} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// One progress bar per file in flight
pub struct SessionProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<(Direction, String), ProgressBar>,
}

impl SessionProgress {
    /// Draw to stderr
    #[must_use]
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Track progress without drawing anything
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            bars: HashMap::new(),
        }
    }

    /// Update the display for one event
    pub fn handle(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::PeerIdentified {
                address,
                system,
                secure,
            } => {
                let _ = self.multi.println(format!(
                    "Connected to {} ({}){}",
                    address,
                    system.as_deref().unwrap_or("unnamed system"),
                    if *secure { ", secure" } else { "" }
                ));
            }
            SessionEvent::FileStarted {
                name,
                direction,
                size,
                offset,
            } => {
                let bar = self
                    .bars
                    .entry((*direction, name.clone()))
                    .or_insert_with(|| {
                        let bar = self.multi.add(ProgressBar::new(*size));
                        bar.set_style(self.style.clone());
                        bar.set_prefix(arrow(*direction));
                        bar.set_message(name.clone());
                        bar
                    });
                bar.set_length(*size);
                bar.set_position(*offset);
            }
            SessionEvent::Progress {
                name,
                direction,
                offset,
                ..
            } => {
                if let Some(bar) = self.bars.get(&(*direction, name.clone())) {
                    bar.set_position(*offset);
                }
            }
            SessionEvent::FileFinished {
                name,
                direction,
                success,
            } => {
                if let Some(bar) = self.bars.get(&(*direction, name.clone())) {
                    if *success {
                        bar.finish();
                    } else {
                        bar.abandon_with_message(format!("{name} (incomplete)"));
                    }
                }
            }
        }
    }

    /// Bar for a file, if one was started
    #[must_use]
    pub fn bar(&self, direction: Direction, name: &str) -> Option<&ProgressBar> {
        self.bars.get(&(direction, name.to_string()))
    }

    /// Consume events until the session drops its sender
    pub async fn follow(mut self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        self.clear();
    }

    /// Remove bars that never finished
    pub fn clear(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

impl Default for SessionProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Sending => "->",
        Direction::Receiving => "<-",
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}.{:01}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0.0s");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_bars_follow_events() {
        let mut progress = SessionProgress::hidden();
        progress.handle(&SessionEvent::FileStarted {
            name: "A.PKT".into(),
            direction: Direction::Receiving,
            size: 100,
            offset: 40,
        });
        progress.handle(&SessionEvent::Progress {
            name: "A.PKT".into(),
            direction: Direction::Receiving,
            offset: 70,
            size: 100,
        });

        let bar = progress.bar(Direction::Receiving, "A.PKT").unwrap();
        assert_eq!(bar.position(), 70);
        assert_eq!(bar.length(), Some(100));
        assert!(progress.bar(Direction::Sending, "A.PKT").is_none());

        progress.handle(&SessionEvent::FileFinished {
            name: "A.PKT".into(),
            direction: Direction::Receiving,
            success: true,
        });
        assert!(progress.bar(Direction::Receiving, "A.PKT").unwrap().is_finished());
    }

    #[test]
    fn test_progress_for_unknown_file_ignored() {
        let mut progress = SessionProgress::hidden();
        progress.handle(&SessionEvent::Progress {
            name: "B.PKT".into(),
            direction: Direction::Sending,
            offset: 1,
            size: 2,
        });
        assert!(progress.bar(Direction::Sending, "B.PKT").is_none());
    }
}
