//! Configuration artifact rendering
//!
//! The renderer applies a fixed data contract to an operator-supplied
//! template: `containers`, an ordered list of `{name, route_name, id,
//! address}` records, and `generated_at`, an RFC 3339 timestamp. The
//! template markup itself is entirely the operator's business; the template
//! source is re-read on every render so edits take effect on the next cycle
//! without a restart.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::RenderError;
use crate::inventory::InventorySnapshot;

const TEMPLATE_NAME: &str = "proxy-config";

/// The record shape the template sees for each container.
#[derive(Debug, Serialize)]
struct RouteEntry<'a> {
    name: &'a str,
    route_name: &'a str,
    id: &'a str,
    address: &'a str,
}

#[derive(Debug, Serialize)]
struct RenderContext<'a> {
    containers: Vec<RouteEntry<'a>>,
    generated_at: String,
}

/// Renders inventory snapshots into configuration artifact bytes.
pub struct Renderer {
    template_path: PathBuf,
}

impl Renderer {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Render the snapshot into artifact bytes. Pure transform: no side
    /// effects beyond reading the template source. An empty snapshot renders
    /// a valid, possibly backend-less, artifact.
    pub fn render(&self, snapshot: &InventorySnapshot) -> Result<Vec<u8>, RenderError> {
        let source =
            std::fs::read_to_string(&self.template_path).map_err(|e| RenderError::TemplateLoad {
                path: self.template_path.clone(),
                reason: e.to_string(),
            })?;

        let mut env = Environment::new();
        // Referencing a field outside the data contract is a template bug;
        // fail the render instead of silently emitting nothing.
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template(TEMPLATE_NAME, &source)
            .map_err(|e| RenderError::TemplateLoad {
                path: self.template_path.clone(),
                reason: e.to_string(),
            })?;

        let context = RenderContext {
            containers: snapshot
                .records()
                .iter()
                .map(|record| RouteEntry {
                    name: &record.name,
                    route_name: &record.route_name,
                    id: &record.id,
                    address: &record.address,
                })
                .collect(),
            generated_at: snapshot.taken_at().to_rfc3339(),
        };

        let template = env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| RenderError::TemplateExec(e.to_string()))?;
        let rendered = template
            .render(&context)
            .map_err(|e| RenderError::TemplateExec(e.to_string()))?;

        Ok(rendered.into_bytes())
    }
}
