//! Session tracking driven by state-machine transitions
//!
//! The state machine knows nothing about durations; this module is the
//! single transition subscriber that derives interval metrics from it. It
//! remembers when an active session and a view session started, and emits a
//! duration record when either ends.
//!
//! Session memory is an explicit struct owned by the tracker, not module
//! globals, so it can be tested in isolation.

use crate::machine::{ActivityState, StateContext};
use crate::metrics::MetricAggregator;
use crate::route::{Route, RouteView};

/// An open view session: which view and when it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewSession {
    view: RouteView,
    started_ms: i64,
}

/// Derives active-time and view-time duration metrics from transitions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    active_session_start_ms: Option<i64>,
    view_session: Option<ViewSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        SessionTracker::default()
    }

    /// Handle an actual state change `(prev, next)` at `now_ms`.
    ///
    /// Leaving `Active` closes the open active session and records its
    /// duration against the context's current route. If no route is known
    /// the duration is dropped; that metric loss is accepted behavior.
    /// Any state change is a boundary that closes an open view session.
    pub fn on_transition(
        &mut self,
        prev: ActivityState,
        next: ActivityState,
        ctx: &StateContext,
        now_ms: i64,
        aggregator: &mut MetricAggregator,
    ) {
        if prev == ActivityState::Active {
            if let Some(start_ms) = self.active_session_start_ms.take() {
                match &ctx.current_route {
                    // Clamp against clock skew in out-of-order timestamps.
                    Some(route) => {
                        aggregator.record_active_time((now_ms - start_ms).max(0), route)
                    }
                    None => {
                        tracing::debug!("active session ended with no route, dropping duration")
                    }
                }
            }
        }

        if next == ActivityState::Active {
            self.active_session_start_ms = Some(now_ms);
        }

        if let Some(session) = self.view_session.take() {
            if let Some(route) = &ctx.current_route {
                aggregator.record_view_duration(
                    session.view,
                    (now_ms - session.started_ms).max(0),
                    route,
                );
            }
        }

        // Re-entering active on a route with a view starts a fresh view session.
        if next == ActivityState::Active {
            if let Some(view) = ctx.current_route.as_ref().and_then(|r| r.view) {
                self.view_session = Some(ViewSession {
                    view,
                    started_ms: now_ms,
                });
            }
        }
    }

    /// Handle a navigation from `prev_route` to `new_route` at `now_ms`.
    ///
    /// Crossing from one view value to another (or to none) closes the
    /// outgoing view session, attributed with the route in effect at the
    /// moment of closing, and opens a new one when the machine is active and
    /// the new route carries a view.
    pub fn on_route_change(
        &mut self,
        prev_route: Option<&Route>,
        new_route: &Route,
        state: ActivityState,
        now_ms: i64,
        aggregator: &mut MetricAggregator,
    ) {
        if let Some(session) = self.view_session {
            if Some(session.view) == new_route.view {
                // Same view continues across the navigation.
                return;
            }
            self.view_session = None;
            if let Some(route) = prev_route {
                aggregator.record_view_duration(
                    session.view,
                    (now_ms - session.started_ms).max(0),
                    route,
                );
            }
        }

        if state == ActivityState::Active {
            if let Some(view) = new_route.view {
                self.view_session = Some(ViewSession {
                    view,
                    started_ms: now_ms,
                });
            }
        }
    }

    /// Whether an active session is currently open.
    pub fn has_active_session(&self) -> bool {
        self.active_session_start_ms.is_some()
    }

    /// Whether a view session is currently open.
    pub fn has_view_session(&self) -> bool {
        self.view_session.is_some()
    }
}
