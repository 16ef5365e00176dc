//! Scan scheduling.
//!
//! The controller decides when the radio scans. It is a three-state machine:
//!
//! ```text
//!            interval elapses                 burst requested
//!   Idle ───────────────────────► Periodic ─────────────────────► Burst
//!    ▲  ◄─────────────────────────    │   ◄───────────────────────  │
//!    │        radio unavailable       │      burst expires          │
//!    └────────────────────────────────┴─────────────────────────────┘
//!                 burst expires with no interval configured
//! ```
//!
//! Transitions are pure: [`ScanState`] methods consume the current state and
//! return a [`Transition`] holding the next state and the [`RadioCommand`]s to
//! issue. Every `StartScan` carries its duration and the state records when
//! the matching `StopScan` is due, so no path leaves the radio scanning
//! without a scheduled stop.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::radio::RadioEvent;

/// Interval/duration pair for periodic scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Time between periodic scan starts. Zero disables periodic scanning.
    pub interval: Duration,
    /// Length of each periodic scan window. Never longer than `interval`.
    pub duration: Duration,
}

impl ScanTiming {
    /// Whether the controller scans on its own.
    #[must_use]
    pub const fn periodic_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// Coarse scan mode exposed to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Radio not scanning and no periodic schedule running.
    Idle,
    /// Normal operation on the interval schedule.
    Periodic,
    /// Temporary scan window requested through the action surface.
    Burst,
}

/// A command for the radio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand {
    /// Scan for the given duration.
    StartScan(Duration),
    /// Stop the current scan.
    StopScan,
}

/// Full scan session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not scanning. `resume_at` is when periodic scanning starts (again);
    /// `None` means never automatically.
    Idle {
        /// Next automatic scan, if any.
        resume_at: Option<Instant>,
    },
    /// On the interval schedule.
    Periodic {
        /// When the next periodic scan starts.
        next_scan_at: Instant,
        /// When the current scan window closes, if one is open.
        scan_ends_at: Option<Instant>,
    },
    /// Manually requested scan window; periodic timers are suspended.
    Burst {
        /// When the burst began.
        entered_at: Instant,
        /// When the burst ends.
        ends_at: Instant,
        /// Time that was left until the next periodic scan when the schedule
        /// was interrupted. `None` if periodic scanning is disabled.
        resume_in: Option<Duration>,
    },
}

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The next state.
    pub state: ScanState,
    /// Commands to send to the radio, in order.
    pub commands: Vec<RadioCommand>,
    /// Whether a new scan session began.
    pub session_started: bool,
}

impl Transition {
    const fn stay(state: ScanState) -> Self {
        Self {
            state,
            commands: Vec::new(),
            session_started: false,
        }
    }
}

/// Next periodic start after `scheduled`, never in the past.
fn advance(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let next = scheduled + interval;
    if next <= now {
        now + interval
    } else {
        next
    }
}

impl ScanState {
    /// State at startup: idle until the first interval elapses.
    #[must_use]
    pub fn initial(timing: &ScanTiming, now: Instant) -> Self {
        Self::Idle {
            resume_at: timing.periodic_enabled().then(|| now + timing.interval),
        }
    }

    /// Coarse mode of this state.
    #[must_use]
    pub const fn mode(&self) -> ScanMode {
        match self {
            Self::Idle { .. } => ScanMode::Idle,
            Self::Periodic { .. } => ScanMode::Periodic,
            Self::Burst { .. } => ScanMode::Burst,
        }
    }

    /// Whether a scan window is currently open.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        matches!(
            self,
            Self::Periodic {
                scan_ends_at: Some(_),
                ..
            } | Self::Burst { .. }
        )
    }

    /// Time remaining in the current burst.
    #[must_use]
    pub fn burst_remaining(&self, now: Instant) -> Option<Duration> {
        match self {
            Self::Burst { ends_at, .. } => Some(ends_at.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Earliest instant at which [`ScanState::on_tick`] would change anything.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        match *self {
            Self::Idle { resume_at } => resume_at,
            Self::Periodic {
                scan_ends_at: Some(end),
                ..
            } => Some(end),
            Self::Periodic { next_scan_at, .. } => Some(next_scan_at),
            Self::Burst { ends_at, .. } => Some(ends_at),
        }
    }

    /// Advance timers.
    #[must_use]
    pub fn on_tick(self, timing: &ScanTiming, now: Instant) -> Transition {
        match self {
            Self::Idle {
                resume_at: Some(at),
            } if now >= at => Self::start_periodic_scan(timing, at, now, Vec::new()),

            Self::Periodic {
                next_scan_at,
                scan_ends_at: Some(end),
            } if now >= end => {
                let commands = vec![RadioCommand::StopScan];
                if now >= next_scan_at {
                    Self::start_periodic_scan(timing, next_scan_at, now, commands)
                } else {
                    Transition {
                        state: Self::Periodic {
                            next_scan_at,
                            scan_ends_at: None,
                        },
                        commands,
                        session_started: false,
                    }
                }
            }

            Self::Periodic {
                next_scan_at,
                scan_ends_at: None,
            } if now >= next_scan_at => {
                Self::start_periodic_scan(timing, next_scan_at, now, Vec::new())
            }

            Self::Burst {
                ends_at, resume_in, ..
            } if now >= ends_at => Transition {
                state: match resume_in {
                    Some(remaining) => Self::Periodic {
                        next_scan_at: now + remaining,
                        scan_ends_at: None,
                    },
                    None => Self::Idle { resume_at: None },
                },
                commands: vec![RadioCommand::StopScan],
                session_started: false,
            },

            state => Transition::stay(state),
        }
    }

    /// Enter a burst of `duration`, overriding whatever is running. The
    /// periodic schedule is frozen and resumes where it left off.
    #[must_use]
    pub fn on_burst(self, timing: &ScanTiming, duration: Duration, now: Instant) -> Transition {
        let resume_in = match self {
            Self::Idle { resume_at } => resume_at.map(|at| at.saturating_duration_since(now)),
            Self::Periodic { next_scan_at, .. } => {
                Some(next_scan_at.saturating_duration_since(now))
            }
            Self::Burst { resume_in, .. } => resume_in,
        };
        let resume_in = resume_in.filter(|_| timing.periodic_enabled());

        Transition {
            state: Self::Burst {
                entered_at: now,
                ends_at: now + duration,
                resume_in,
            },
            commands: vec![RadioCommand::StartScan(duration)],
            session_started: true,
        }
    }

    /// The radio rejected a request: fall back to idle and retry at the next
    /// scheduled periodic tick.
    #[must_use]
    pub fn on_radio_failure(self, timing: &ScanTiming, now: Instant) -> Transition {
        let resume_at = match self {
            Self::Idle { resume_at } => resume_at,
            Self::Periodic { next_scan_at, .. } => Some(next_scan_at),
            Self::Burst { resume_in, .. } => resume_in.map(|remaining| now + remaining),
        };
        let resume_at = resume_at.filter(|_| timing.periodic_enabled());

        Transition::stay(Self::Idle { resume_at })
    }

    fn start_periodic_scan(
        timing: &ScanTiming,
        scheduled: Instant,
        now: Instant,
        mut commands: Vec<RadioCommand>,
    ) -> Transition {
        commands.push(RadioCommand::StartScan(timing.duration));
        Transition {
            state: Self::Periodic {
                next_scan_at: advance(scheduled, timing.interval, now),
                scan_ends_at: Some(now + timing.duration),
            },
            commands,
            session_started: true,
        }
    }
}

/// Scan windows remembered for attributing queued advertisements.
const WINDOW_HISTORY: usize = 8;

/// When one scan session was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    /// Session identifier.
    pub session: u64,
    /// Mode that opened the window.
    pub mode: ScanMode,
    /// When the start command was issued.
    pub opened_at: Instant,
    /// When the window closed; `None` while it is open.
    pub closed_at: Option<Instant>,
}

impl ScanWindow {
    /// Whether `at` falls inside the window. Both ends are inclusive.
    #[must_use]
    pub fn contains(&self, at: Instant) -> bool {
        at >= self.opened_at && !matches!(self.closed_at, Some(closed) if at > closed)
    }
}

/// Owns the scan state and counts scan sessions.
#[derive(Debug, Clone)]
pub struct ScanController {
    timing: ScanTiming,
    state: ScanState,
    session: u64,
    radio_active: bool,
    windows: VecDeque<ScanWindow>,
}

impl ScanController {
    /// Create a controller that starts idle.
    #[must_use]
    pub fn new(timing: ScanTiming, now: Instant) -> Self {
        Self {
            timing,
            state: ScanState::initial(&timing, now),
            session: 0,
            radio_active: false,
            windows: VecDeque::with_capacity(WINDOW_HISTORY),
        }
    }

    /// Configured timing.
    #[must_use]
    pub const fn timing(&self) -> &ScanTiming {
        &self.timing
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ScanState {
        &self.state
    }

    /// Current coarse mode.
    #[must_use]
    pub const fn mode(&self) -> ScanMode {
        self.state.mode()
    }

    /// Whether a scan window is open.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.state.is_scanning()
    }

    /// Identifier of the most recent scan session. Increases on every scan start.
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Whether the radio has confirmed that it is scanning.
    #[must_use]
    pub const fn radio_active(&self) -> bool {
        self.radio_active
    }

    /// The scan window that was open at `at`, among the most recent ones.
    ///
    /// Advertisements are attributed by receive time, so a frame heard just
    /// before a window closed still counts after the close is processed.
    #[must_use]
    pub fn window_at(&self, at: Instant) -> Option<&ScanWindow> {
        self.windows.iter().rev().find(|window| window.contains(at))
    }

    /// Advance timers and return the commands to issue.
    pub fn tick(&mut self, now: Instant) -> Vec<RadioCommand> {
        let transition = self.state.on_tick(&self.timing, now);
        self.apply(transition, now)
    }

    /// Start a burst and return the commands to issue.
    pub fn start_burst(&mut self, duration: Duration, now: Instant) -> Vec<RadioCommand> {
        info!(duration_ms = duration.as_millis(), from = ?self.mode(), "Entering scan burst");
        let transition = self.state.on_burst(&self.timing, duration, now);
        self.apply(transition, now)
    }

    /// Record that the radio rejected a command.
    pub fn radio_failed(&mut self, now: Instant) {
        let transition = self.state.on_radio_failure(&self.timing, now);
        let retry_in = transition
            .state
            .next_deadline()
            .map(|at| at.saturating_duration_since(now));
        warn!(
            from = ?self.mode(),
            retry_in = ?retry_in,
            "Radio unavailable, scan controller falling back to idle"
        );
        self.apply(transition, now);
    }

    /// Track radio lifecycle confirmations.
    pub fn on_radio_event(&mut self, event: &RadioEvent) {
        match event {
            RadioEvent::ScanStarted => self.radio_active = true,
            RadioEvent::ScanStopped | RadioEvent::ScanFailed(_) => self.radio_active = false,
            RadioEvent::Advertisement(_) => {}
        }
    }

    fn apply(&mut self, transition: Transition, now: Instant) -> Vec<RadioCommand> {
        let from = self.state.mode();
        let was_scanning = self.state.is_scanning();
        self.state = transition.state;
        if was_scanning && (transition.session_started || !self.state.is_scanning()) {
            if let Some(window) = self.windows.back_mut() {
                window.closed_at.get_or_insert(now);
            }
        }
        if transition.session_started {
            self.session += 1;
            if self.windows.len() == WINDOW_HISTORY {
                self.windows.pop_front();
            }
            self.windows.push_back(ScanWindow {
                session: self.session,
                mode: self.state.mode(),
                opened_at: now,
                closed_at: None,
            });
        }
        if from != self.state.mode() {
            debug!(?from, to = ?self.state.mode(), session = self.session, "Scan mode changed");
        }
        transition.commands
    }
}
