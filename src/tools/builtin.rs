//! Dashboard tools the model can call

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolDeclaration, ToolHandler};
use crate::dashboard::{DashboardHandle, DisplayMode, WidgetSpec};
use crate::{Error, Result};

/// `update_mode({mode})`
pub struct UpdateModeTool {
    dashboard: DashboardHandle,
}

impl UpdateModeTool {
    #[must_use]
    pub const fn new(dashboard: DashboardHandle) -> Self {
        Self { dashboard }
    }
}

#[derive(Deserialize)]
struct UpdateModeArgs {
    mode: String,
}

#[async_trait]
impl ToolHandler for UpdateModeTool {
    fn declaration(&self) -> ToolDeclaration {
        let modes: Vec<&str> = DisplayMode::ALL.iter().map(|m| m.as_str()).collect();
        ToolDeclaration {
            name: "update_mode".to_string(),
            description: "Switch the dashboard display mode".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "mode": {
                        "type": "STRING",
                        "enum": modes,
                        "description": "Display mode to apply"
                    }
                },
                "required": ["mode"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: UpdateModeArgs = serde_json::from_value(args)
            .map_err(|e| Error::Handler(format!("invalid update_mode arguments: {e}")))?;
        let mode: DisplayMode = args.mode.parse()?;

        self.dashboard.set_mode(mode).await;
        Ok(json!({ "mode": mode }))
    }
}

/// `create_widget({type, title, data, id?})`
pub struct CreateWidgetTool {
    dashboard: DashboardHandle,
}

impl CreateWidgetTool {
    #[must_use]
    pub const fn new(dashboard: DashboardHandle) -> Self {
        Self { dashboard }
    }
}

#[async_trait]
impl ToolHandler for CreateWidgetTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: "create_widget".to_string(),
            description: "Add a widget to the dashboard, or replace one by id".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "type": {
                        "type": "STRING",
                        "description": "Widget kind, e.g. chart, metric, table"
                    },
                    "title": { "type": "STRING" },
                    "data": {
                        "type": "OBJECT",
                        "description": "Widget payload"
                    },
                    "id": {
                        "type": "STRING",
                        "description": "Stable id; reusing it replaces the widget"
                    }
                },
                "required": ["type", "title"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let spec: WidgetSpec = serde_json::from_value(args)
            .map_err(|e| Error::Handler(format!("invalid create_widget arguments: {e}")))?;

        let widget = self.dashboard.upsert_widget(spec).await;
        Ok(json!({ "id": widget.id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_mode_sets_dashboard() {
        let dashboard = DashboardHandle::default();
        let tool = UpdateModeTool::new(dashboard.clone());

        let out = tool.call(json!({"mode": "HIGH_CONTRAST"})).await.unwrap();
        assert_eq!(out, json!({"mode": "HIGH_CONTRAST"}));
        assert_eq!(dashboard.mode().await, DisplayMode::HighContrast);
    }

    #[tokio::test]
    async fn update_mode_rejects_unknown_mode() {
        let tool = UpdateModeTool::new(DashboardHandle::default());
        assert!(tool.call(json!({"mode": "DISCO"})).await.is_err());
        assert!(tool.call(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn create_widget_upserts_by_id() {
        let dashboard = DashboardHandle::default();
        let tool = CreateWidgetTool::new(dashboard.clone());

        let args = json!({"type": "metric", "title": "MRR", "data": {"value": 1}, "id": "mrr"});
        tool.call(args.clone()).await.unwrap();
        tool.call(args).await.unwrap();
        tool.call(json!({"type": "chart", "title": "Signups"}))
            .await
            .unwrap();

        let widgets = dashboard.widgets().await;
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].id, "mrr");
    }

    #[test]
    fn declarations_name_the_tools() {
        let dashboard = DashboardHandle::default();
        assert_eq!(UpdateModeTool::new(dashboard.clone()).declaration().name, "update_mode");
        assert_eq!(CreateWidgetTool::new(dashboard).declaration().name, "create_widget");
    }
}
