//! Activity state machine
//!
//! A small finite-state model of user engagement with three states:
//! `Unfocused` (initial), `Active`, and `Idle`. The machine is driven by
//! focus/blur/activity/timeout events plus an orthogonal `Navigate` event
//! that only updates the carried route context.
//!
//! The machine itself has no clock and no I/O: callers pass the current time
//! (epoch milliseconds) into [`ActivityMachine::transition`], which makes the
//! whole transition table trivially testable. Transitions are synchronous and
//! atomic; a registered observer is notified inline, and only when the state
//! actually changed.

use crate::route::Route;

/// Engagement state of the tracked user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Page does not have focus (initial state)
    Unfocused,
    /// Focused and recently active
    Active,
    /// Focused but inactive past the idle timeout
    Idle,
}

/// Events driving the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// Page gained focus
    Focus,
    /// Page lost focus
    Blur,
    /// A qualifying user interaction occurred
    Activity,
    /// Periodic idle re-evaluation fired
    IdleTimeout,
    /// Navigation occurred; updates route context only, never the state
    Navigate(Route),
}

/// Full machine state: the finite state plus the context carried alongside it.
///
/// `current_route` is not part of the finite-state space — it updates
/// independently of `current_state` and never resets during a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateContext {
    /// Current engagement state
    pub current_state: ActivityState,
    /// Timestamp (epoch ms) of the most recent qualifying interaction
    pub last_activity_ms: i64,
    /// Timestamp (epoch ms) of the last actual state change
    pub last_state_change_ms: i64,
    /// Last known route, absent before the first navigation
    pub current_route: Option<Route>,
}

/// Observer invoked synchronously on every actual state change.
///
/// Receives `(previous, next, context snapshot, now_ms)`.
pub type TransitionObserver = Box<dyn FnMut(ActivityState, ActivityState, &StateContext, i64) + Send>;

/// Finite-state model of user engagement.
pub struct ActivityMachine {
    ctx: StateContext,
    idle_timeout_ms: i64,
    observer: Option<TransitionObserver>,
}

impl ActivityMachine {
    /// Create a machine in the `Unfocused` state with the given idle timeout.
    pub fn new(idle_timeout_ms: i64) -> Self {
        ActivityMachine {
            ctx: StateContext {
                current_state: ActivityState::Unfocused,
                last_activity_ms: 0,
                last_state_change_ms: 0,
                current_route: None,
            },
            idle_timeout_ms,
            observer: None,
        }
    }

    /// Register the single transition observer.
    ///
    /// Re-registering replaces the previous observer rather than adding one.
    pub fn set_observer(&mut self, observer: TransitionObserver) {
        self.observer = Some(observer);
    }

    /// Apply an event at the given time (epoch ms).
    ///
    /// Invalid event/state combinations are defined no-ops rather than
    /// errors, to tolerate out-of-order delivery from the surrounding
    /// message layer. `Navigate` always updates the route context and never
    /// fires the observer. The observer fires iff the state actually changed,
    /// and `last_state_change_ms` updates exactly then.
    pub fn transition(&mut self, event: ActivityEvent, now_ms: i64) {
        let event = match event {
            ActivityEvent::Navigate(route) => {
                self.ctx.current_route = Some(route);
                return;
            }
            other => other,
        };

        let prev = self.ctx.current_state;
        let next = match (prev, &event) {
            (ActivityState::Unfocused, ActivityEvent::Focus) => {
                self.ctx.last_activity_ms = now_ms;
                ActivityState::Active
            }
            (ActivityState::Active, ActivityEvent::Blur)
            | (ActivityState::Idle, ActivityEvent::Blur) => ActivityState::Unfocused,
            (ActivityState::Idle, ActivityEvent::Activity) => {
                self.ctx.last_activity_ms = now_ms;
                ActivityState::Active
            }
            (ActivityState::Active, ActivityEvent::Activity) => {
                // No state change, but the activity clock still advances.
                self.ctx.last_activity_ms = now_ms;
                ActivityState::Active
            }
            (ActivityState::Active, ActivityEvent::IdleTimeout)
                if now_ms - self.ctx.last_activity_ms >= self.idle_timeout_ms =>
            {
                ActivityState::Idle
            }
            _ => prev,
        };

        if next != prev {
            self.ctx.current_state = next;
            self.ctx.last_state_change_ms = now_ms;
            tracing::debug!(?prev, ?next, now_ms, "activity state changed");
            if let Some(observer) = self.observer.as_mut() {
                observer(prev, next, &self.ctx, now_ms);
            }
        }
    }

    /// Defensive copy of the full machine context.
    pub fn context(&self) -> StateContext {
        self.ctx.clone()
    }

    /// Current engagement state.
    pub fn current_state(&self) -> ActivityState {
        self.ctx.current_state
    }

    /// Change the idle timeout; takes effect on the next idle evaluation.
    pub fn set_idle_timeout_ms(&mut self, idle_timeout_ms: i64) {
        self.idle_timeout_ms = idle_timeout_ms;
    }
}

impl std::fmt::Debug for ActivityMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityMachine")
            .field("ctx", &self.ctx)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}
