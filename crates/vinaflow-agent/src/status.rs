//! Service status: crate version and whether the external tools can be launched.

use std::path::Path;

use serde::Serialize;
use vinaflow_docking::process::tool_version;

use crate::config::ToolsConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub path: String,
    /// First line of the tool's version banner; `None` if it could not be run.
    pub version: Option<String>,
}

impl ToolStatus {
    pub fn available(&self) -> bool {
        self.version.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub tools: Vec<ToolStatus>,
}

impl ServiceStatus {
    pub fn ready(&self) -> bool {
        self.tools.iter().all(ToolStatus::available)
    }
}

pub async fn tool_status(tools: &ToolsConfig) -> ServiceStatus {
    let obabel = tool_version(Path::new(&tools.obabel_path), "-V").await;
    let vina = tool_version(Path::new(&tools.vina_path), "--version").await;
    ServiceStatus {
        version: env!("CARGO_PKG_VERSION"),
        tools: vec![
            ToolStatus { name: "obabel", path: tools.obabel_path.clone(), version: obabel },
            ToolStatus { name: "vina", path: tools.vina_path.clone(), version: vina },
        ],
    }
}
