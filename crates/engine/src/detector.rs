use presence_sync_core::{AcceptedState, PlayerSnapshot};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    TrackChanged,
    PlaybackStarted,
    PlaybackPaused,
    TimeExplicitlyChanged,
    DurationMismatch,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeReason::TrackChanged => "track changed",
            ChangeReason::PlaybackStarted => "playback started",
            ChangeReason::PlaybackPaused => "playback paused",
            ChangeReason::TimeExplicitlyChanged => "time explicitly changed",
            ChangeReason::DurationMismatch => "duration mismatch",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing accepted yet; publish unconditionally and log no reason.
    Bootstrap,
    Changed(ChangeReason),
    Unchanged,
}

impl Decision {
    pub fn publishes(self) -> bool {
        !matches!(self, Decision::Unchanged)
    }

    pub fn reason(self) -> Option<ChangeReason> {
        match self {
            Decision::Changed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Ordered rules, first match wins. A duration mismatch is only reported when neither the
/// title, the playing flag nor a seek explains the update, so polling jitter right after a
/// real transition never fires twice.
pub fn detect(
    previous: Option<&AcceptedState>,
    current: &PlayerSnapshot,
    explicit_seek: bool,
) -> Option<ChangeReason> {
    let previous = previous?;
    if previous.track_title != current.track_title {
        Some(ChangeReason::TrackChanged)
    } else if previous.is_playing != current.is_playing {
        Some(if current.is_playing {
            ChangeReason::PlaybackStarted
        } else {
            ChangeReason::PlaybackPaused
        })
    } else if explicit_seek {
        Some(ChangeReason::TimeExplicitlyChanged)
    } else if previous.observed_duration_ms != current.duration_ms {
        Some(ChangeReason::DurationMismatch)
    } else {
        None
    }
}

pub fn decide(
    previous: Option<&AcceptedState>,
    current: &PlayerSnapshot,
    explicit_seek: bool,
) -> Decision {
    if previous.is_none() {
        return Decision::Bootstrap;
    }
    match detect(previous, current, explicit_seek) {
        Some(reason) => Decision::Changed(reason),
        None => Decision::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::{decide, detect, ChangeReason, Decision};
    use presence_sync_core::{AcceptedState, PlayerSnapshot};

    fn accepted(title: &str, playing: bool, dur: u64) -> AcceptedState {
        AcceptedState {
            track_title: title.to_string(),
            is_playing: playing,
            observed_duration_ms: dur,
        }
    }

    fn snap(title: &str, playing: bool, dur: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            track_title: title.to_string(),
            is_playing: playing,
            duration_ms: dur,
            remaining_ms: dur / 2,
            ..PlayerSnapshot::default()
        }
    }

    #[test]
    fn title_change_dominates_every_other_difference() {
        let prev = accepted("A", false, 200_000);
        for (playing, dur, seek) in [
            (false, 200_000, false),
            (true, 200_000, false),
            (true, 180_000, true),
            (false, 1, true),
        ] {
            assert_eq!(
                detect(Some(&prev), &snap("B", playing, dur), seek),
                Some(ChangeReason::TrackChanged)
            );
        }
    }

    #[test]
    fn playing_flag_flip_is_classified_by_new_value() {
        let paused = accepted("A", false, 200_000);
        let playing = accepted("A", true, 200_000);

        assert_eq!(
            detect(Some(&paused), &snap("A", true, 200_000), false),
            Some(ChangeReason::PlaybackStarted)
        );
        assert_eq!(
            detect(Some(&playing), &snap("A", false, 200_000), false),
            Some(ChangeReason::PlaybackPaused)
        );
        // flip still wins over seek and duration drift
        assert_eq!(
            detect(Some(&playing), &snap("A", false, 199_000), true),
            Some(ChangeReason::PlaybackPaused)
        );
    }

    #[test]
    fn seek_beats_duration_mismatch() {
        let prev = accepted("A", true, 200_000);
        assert_eq!(
            detect(Some(&prev), &snap("A", true, 201_000), true),
            Some(ChangeReason::TimeExplicitlyChanged)
        );
        assert_eq!(
            detect(Some(&prev), &snap("A", true, 201_000), false),
            Some(ChangeReason::DurationMismatch)
        );
    }

    #[test]
    fn identical_state_without_seek_is_unchanged() {
        let prev = accepted("A", true, 200_000);
        assert_eq!(detect(Some(&prev), &snap("A", true, 200_000), false), None);
        assert_eq!(
            decide(Some(&prev), &snap("A", true, 200_000), false),
            Decision::Unchanged
        );
    }

    #[test]
    fn first_observation_is_bootstrap_without_reason() {
        let current = snap("A", true, 200_000);
        assert_eq!(detect(None, &current, true), None);

        let decision = decide(None, &current, true);
        assert_eq!(decision, Decision::Bootstrap);
        assert!(decision.publishes());
        assert!(decision.reason().is_none());
    }
}
