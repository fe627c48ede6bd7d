//! Tools the live model can call

mod builtin;
mod dispatcher;

use std::sync::Arc;
use std::time::Duration;

pub use builtin::{CreateWidgetTool, UpdateModeTool};
pub use dispatcher::{ToolDeclaration, ToolDispatcher, ToolHandler, ToolRequest, ToolResult};

use crate::dashboard::DashboardHandle;

/// Dispatcher preloaded with the dashboard tools
#[must_use]
pub fn dashboard_tools(dashboard: &DashboardHandle, timeout: Duration) -> ToolDispatcher {
    ToolDispatcher::new(timeout)
        .with(Arc::new(UpdateModeTool::new(dashboard.clone())))
        .with(Arc::new(CreateWidgetTool::new(dashboard.clone())))
}
