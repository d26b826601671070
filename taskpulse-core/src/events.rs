//! Inbound event messages
//!
//! The page-side capture layer sends a typed union keyed by a `type`
//! discriminator. Each message carries the route known to the page at the
//! time (when one exists) and the capture timestamp in epoch milliseconds;
//! interpretation into state transitions and aggregator writes happens in
//! the tracker.

use serde::{Deserialize, Serialize};

use crate::route::Route;

/// What kind of raw interaction an `ACTIVITY` message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Mouse,
    Keyboard,
    Scroll,
    Typing,
    Submit,
}

/// Typed union of messages from the page context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "FOCUS")]
    Focus {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
    },

    #[serde(rename = "BLUR")]
    Blur {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
    },

    #[serde(rename = "ACTIVITY")]
    Activity {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
        #[serde(default)]
        activity_kind: Option<ActivityKind>,
    },

    #[serde(rename = "SCROLL")]
    Scroll {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
        /// Distance scrolled since the last throttled report
        #[serde(default)]
        scroll_distance: i64,
        /// Absolute scroll position, when the page reports one
        #[serde(default)]
        scroll_position: Option<i64>,
    },

    #[serde(rename = "NAVIGATION")]
    Navigation {
        route: Route,
        timestamp: i64,
        #[serde(default)]
        previous_route: Option<Route>,
    },

    #[serde(rename = "HUMAN_INTERVENTION")]
    HumanIntervention {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
        /// What triggered the intervention (button, shortcut, ...)
        #[serde(default)]
        trigger: Option<String>,
    },

    #[serde(rename = "TYPING")]
    Typing {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
        char_count: i64,
    },

    #[serde(rename = "MESSAGE_SENT")]
    MessageSent {
        #[serde(default)]
        route: Option<Route>,
        timestamp: i64,
        message_length: i64,
    },
}

impl InboundMessage {
    /// Capture timestamp in epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        match self {
            InboundMessage::Focus { timestamp, .. }
            | InboundMessage::Blur { timestamp, .. }
            | InboundMessage::Activity { timestamp, .. }
            | InboundMessage::Scroll { timestamp, .. }
            | InboundMessage::Navigation { timestamp, .. }
            | InboundMessage::HumanIntervention { timestamp, .. }
            | InboundMessage::Typing { timestamp, .. }
            | InboundMessage::MessageSent { timestamp, .. } => *timestamp,
        }
    }

    /// The route accompanying this message, when one was captured.
    pub fn route(&self) -> Option<&Route> {
        match self {
            InboundMessage::Navigation { route, .. } => Some(route),
            InboundMessage::Focus { route, .. }
            | InboundMessage::Blur { route, .. }
            | InboundMessage::Activity { route, .. }
            | InboundMessage::Scroll { route, .. }
            | InboundMessage::HumanIntervention { route, .. }
            | InboundMessage::Typing { route, .. }
            | InboundMessage::MessageSent { route, .. } => route.as_ref(),
        }
    }
}
