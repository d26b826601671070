//! Route model
//!
//! A [`Route`] is an immutable snapshot of the tracked application's current
//! navigation location. Routes are produced by the page-side parser on every
//! navigation and replace the state machine's stored route atomically; they
//! are never mutated in place.

use serde::{Deserialize, Serialize};

/// Which screen of the application a route points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    /// Workspace overview
    Workspace,
    /// Workspace creation flow
    WorkspaceCreate,
    /// Task board for a project
    TaskBoard,
    /// Single task detail page
    TaskDetail,
    /// Anything the parser could not classify
    Unknown,
}

impl RouteType {
    /// Stable string form used in metric attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Workspace => "workspace",
            RouteType::WorkspaceCreate => "workspace_create",
            RouteType::TaskBoard => "task_board",
            RouteType::TaskDetail => "task_detail",
            RouteType::Unknown => "unknown",
        }
    }
}

/// Sub-view within a route (independent of the route type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteView {
    Diffs,
    Preview,
}

impl RouteView {
    /// Stable string form used in metric attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteView::Diffs => "diffs",
            RouteView::Preview => "preview",
        }
    }
}

/// Immutable snapshot of a navigation location.
///
/// Any route type may carry a `view`; the two dimensions are independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route classification
    #[serde(rename = "type")]
    pub route_type: RouteType,
    /// Workspace identifier, when the route names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Project identifier, when the route names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Task identifier, when the route names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Active sub-view, when one is selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<RouteView>,
}

impl Route {
    /// A route of the given type with no identifiers and no view.
    pub fn new(route_type: RouteType) -> Self {
        Route {
            route_type,
            workspace_id: None,
            project_id: None,
            task_id: None,
            view: None,
        }
    }

    /// Task detail route with its full identifier chain.
    pub fn task_detail(
        workspace_id: impl Into<String>,
        project_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Route {
            route_type: RouteType::TaskDetail,
            workspace_id: Some(workspace_id.into()),
            project_id: Some(project_id.into()),
            task_id: Some(task_id.into()),
            view: None,
        }
    }

    /// Task board route for a project.
    pub fn task_board(workspace_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Route {
            route_type: RouteType::TaskBoard,
            workspace_id: Some(workspace_id.into()),
            project_id: Some(project_id.into()),
            task_id: None,
            view: None,
        }
    }

    /// Returns a copy of this route with the given view selected.
    pub fn with_view(mut self, view: RouteView) -> Self {
        self.view = Some(view);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_type_strings() {
        assert_eq!(RouteType::Workspace.as_str(), "workspace");
        assert_eq!(RouteType::WorkspaceCreate.as_str(), "workspace_create");
        assert_eq!(RouteType::TaskBoard.as_str(), "task_board");
        assert_eq!(RouteType::TaskDetail.as_str(), "task_detail");
        assert_eq!(RouteType::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_view_independent_of_type() {
        // Any route type may carry a view.
        let route = Route::new(RouteType::Workspace).with_view(RouteView::Preview);
        assert_eq!(route.route_type, RouteType::Workspace);
        assert_eq!(route.view, Some(RouteView::Preview));
    }

    #[test]
    fn test_route_serde_round_trip() {
        let route = Route::task_detail("ws-1", "proj-1", "task-9").with_view(RouteView::Diffs);
        let json = serde_json::to_string(&route).unwrap();
        let back: Route = serde_json::from_str(&json).unwrap();
        assert_eq!(back, route);
    }

    #[test]
    fn test_route_deserialize_sparse() {
        // Fields absent from the wire stay absent, not empty strings.
        let route: Route = serde_json::from_str(r#"{"type":"workspace_create"}"#).unwrap();
        assert_eq!(route.route_type, RouteType::WorkspaceCreate);
        assert!(route.workspace_id.is_none());
        assert!(route.view.is_none());
    }
}
