use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PatchPlan {
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Deserialize)]
pub struct PlanStep {
    pub patch: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub max_offset: Option<usize>,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl PlanStep {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.patch.display().to_string(),
        }
    }
}

pub fn load_plan(path: &Path) -> Result<PatchPlan> {
    let data = fs::read(path).with_context(|| format!("reading plan {}", path.display()))?;
    let plan: PatchPlan = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    } else {
        serde_yaml::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    };
    if plan.steps.is_empty() {
        bail!("plan {} contains no steps", path.display());
    }
    Ok(plan)
}
