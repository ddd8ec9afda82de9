//! List command - show the scenarios the runner would pick up

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use nomad_e2e::{HarnessConfig, Scenario};
use serde::Serialize;

use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Scenario directory (defaults to output.scenarios_dir)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Only list scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct ScenarioSummary {
    name: String,
    tags: Vec<String>,
    steps: usize,
    reset: bool,
    description: String,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            steps: scenario.step_count(),
            reset: scenario.reset,
            description: scenario.description.trim().to_string(),
        }
    }
}

impl TableDisplay for ScenarioSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Tags", "Steps", "Reset", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.tags.join(", "),
            self.steps.to_string(),
            if self.reset { "yes" } else { "no" }.to_string(),
            self.description.clone(),
        ]
    }
}

pub fn execute(args: ListArgs, config: HarnessConfig) -> Result<bool> {
    let dir = args.scenarios.unwrap_or(config.output.scenarios_dir);
    let scenarios = Scenario::load_all(&dir)?;

    let summaries: Vec<ScenarioSummary> = match &args.tag {
        Some(tag) => Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .map(ScenarioSummary::from)
            .collect(),
        None => scenarios.iter().map(ScenarioSummary::from).collect(),
    };

    output::print_list(&summaries, args.format);
    Ok(true)
}
