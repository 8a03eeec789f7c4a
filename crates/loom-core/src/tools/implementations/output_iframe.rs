//! Output iframe tool - render an HTML snippet for the user
//!
//! The model only learns that the snippet was displayed; the HTML itself goes
//! to the display channel.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolError, ToolOut};

pub struct OutputIframeTool;

#[derive(Deserialize)]
struct Params {
    html: String,
    #[serde(default)]
    title: Option<String>,
}

#[async_trait]
impl Tool for OutputIframeTool {
    fn name(&self) -> &str {
        "output_iframe"
    }

    fn description(&self) -> &str {
        r#"Display HTML content to the user in a sandboxed iframe.

Use this tool for visualizations like charts, graphs, and HTML demos that the user should see.
The HTML will be rendered in a secure sandbox with scripts enabled but isolated from the parent page.

Do NOT use this tool for:
- Regular text responses (use normal messages instead)
- File operations (use bash)
- Simple data display (just describe it in text)

Good uses:
- Vega-Lite or other chart library visualizations
- HTML/CSS demonstrations
- Interactive widgets or mini-apps
- SVG graphics

The HTML should be self-contained. You can include inline <script> and <style> tags.
External resources can be loaded via CDN (e.g., https://cdn.jsdelivr.net/)."#
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "html": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The HTML content to display. Should be a complete HTML document or fragment."
                },
                "title": {
                    "type": "string",
                    "description": "Optional title describing the visualization"
                }
            },
            "required": ["html"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn run(&self, _ctx: &ToolContext, input: Value) -> ToolOut {
        let params: Params = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return ToolOut::error(ToolError::new("invalid_input", e)),
        };

        let mut display = json!({
            "type": "output_iframe",
            "html": params.html,
        });
        if let Some(title) = params.title {
            display["title"] = Value::String(title);
        }

        ToolOut::text("displayed").with_display(display)
    }
}
