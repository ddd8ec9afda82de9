//! Declarative YAML scenario specification

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::context::Origin;
use crate::driver::Locator;
use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Run the test data reset hook before this scenario
    #[serde(default = "default_reset")]
    pub reset: bool,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

fn default_reset() -> bool {
    true
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Sign in through the application's login form
    Login { identity: String, secret: String },

    /// Navigate the active context to a path
    Visit { path: String },

    /// Wait for an element to exist
    Find {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains: Option<String>,
    },

    /// Click an element
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains: Option<String>,
    },

    /// Type text into an element
    Type {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains: Option<String>,
        text: String,
    },

    /// Choose an option of a select element
    Select {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contains: Option<String>,
        option: String,
    },

    /// Wait for text to be visible
    AssertText { text: String },

    /// Run nested steps inside another origin's document
    Origin { origin: Origin, steps: Vec<Step> },

    /// Log a message (for debugging)
    Log { message: String },
}

impl Step {
    /// Locator of the element this step acts on, if it acts on one.
    pub fn locator(&self) -> E2eResult<Option<Locator>> {
        let (selector, contains) = match self {
            Step::Find { selector, contains }
            | Step::Click { selector, contains }
            | Step::Type { selector, contains, .. }
            | Step::Select { selector, contains, .. } => (selector, contains),
            _ => return Ok(None),
        };
        match (selector, contains) {
            (Some(s), None) if !s.is_empty() => Ok(Some(Locator::Css(s.clone()))),
            (None, Some(t)) if !t.is_empty() => Ok(Some(Locator::Text(t.clone()))),
            (Some(_), Some(_)) => Err(E2eError::SpecParse(format!(
                "{}: use either `selector` or `contains`, not both",
                self.name()
            ))),
            _ => Err(E2eError::SpecParse(format!(
                "{}: needs a non-empty `selector` or `contains`",
                self.name()
            ))),
        }
    }

    /// Short label used in logs and results
    pub fn name(&self) -> String {
        fn target(selector: &Option<String>, contains: &Option<String>) -> String {
            match (selector, contains) {
                (Some(s), _) => s.clone(),
                (None, Some(t)) => format!("\"{t}\""),
                (None, None) => "?".to_string(),
            }
        }

        match self {
            Step::Login { identity, .. } => format!("login:{identity}"),
            Step::Visit { path } => format!("visit:{path}"),
            Step::Find { selector, contains } => format!("find:{}", target(selector, contains)),
            Step::Click { selector, contains } => format!("click:{}", target(selector, contains)),
            Step::Type { selector, contains, .. } => format!("type:{}", target(selector, contains)),
            Step::Select { selector, contains, option } => {
                format!("select:{}={}", target(selector, contains), option)
            }
            Step::AssertText { text } => format!("assert_text:\"{text}\""),
            Step::Origin { origin, .. } => format!("origin:{origin}"),
            Step::Log { message } => {
                let end = message
                    .char_indices()
                    .nth(30)
                    .map_or(message.len(), |(i, _)| i);
                format!("log:{}", &message[..end])
            }
        }
    }

    fn validate(&self) -> E2eResult<()> {
        self.locator()?;
        match self {
            Step::Login { identity, .. } if identity.is_empty() => Err(E2eError::SpecParse(
                "login: identity must not be empty".into(),
            )),
            Step::Visit { path } if path.is_empty() => {
                Err(E2eError::SpecParse("visit: path must not be empty".into()))
            }
            Step::Origin { origin, steps } => {
                if steps.is_empty() {
                    return Err(E2eError::SpecParse(format!(
                        "origin {origin}: block has no steps"
                    )));
                }
                steps.iter().try_for_each(Step::validate)
            }
            _ => Ok(()),
        }
    }

    /// Number of steps this step stands for, counting nested ones.
    pub fn count(&self) -> usize {
        match self {
            Step::Origin { steps, .. } => 1 + steps.iter().map(Step::count).sum::<usize>(),
            _ => 1,
        }
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, ordered by file name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "scenario directory {} does not exist",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        let mut names = std::collections::HashSet::new();
        if let Some(dup) = scenarios.iter().find(|s| !names.insert(s.name.as_str())) {
            return Err(E2eError::SpecParse(format!(
                "duplicate scenario name '{}'",
                dup.name
            )));
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        self.steps.iter().try_for_each(Step::validate)
    }

    pub fn step_count(&self) -> usize {
        self.steps.iter().map(Step::count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_origin_block() {
        let yaml = r#"
name: add-card
tags:
  - billing
steps:
  - action: login
    identity: pixel
    secret: password
  - action: click
    contains: Add Credit Card
  - action: origin
    origin: https://checkout.stripe.com
    steps:
      - action: type
        selector: '#cardNumber'
        text: '4242424242424242'
      - action: select
        selector: '#billingCountry'
        option: US
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "add-card");
        assert!(scenario.reset);
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.step_count(), 5);

        let Step::Origin { origin, steps } = &scenario.steps[2] else {
            panic!("expected origin block");
        };
        assert_eq!(origin.as_str(), "https://checkout.stripe.com");
        assert_eq!(
            steps[0].locator().unwrap(),
            Some(Locator::Css("#cardNumber".into()))
        );
        assert_eq!(
            scenario.steps[1].locator().unwrap(),
            Some(Locator::Text("Add Credit Card".into()))
        );
    }

    #[test]
    fn test_rejects_ambiguous_target() {
        let yaml = r#"
name: bad
steps:
  - action: click
    selector: '#a'
    contains: A
"#;
        assert!(matches!(Scenario::from_yaml(yaml), Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn test_rejects_missing_target_and_empty_blocks() {
        let no_target = "name: bad\nsteps:\n  - action: click\n";
        assert!(Scenario::from_yaml(no_target).is_err());

        let empty_block =
            "name: bad\nsteps:\n  - action: origin\n    origin: https://a.test\n    steps: []\n";
        assert!(Scenario::from_yaml(empty_block).is_err());

        let bad_origin =
            "name: bad\nsteps:\n  - action: origin\n    origin: nowhere\n    steps: []\n";
        assert!(Scenario::from_yaml(bad_origin).is_err());

        assert!(Scenario::from_yaml("name: bad\nsteps: []\n").is_err());
    }

    #[test]
    fn test_step_names() {
        let step = Step::Select {
            selector: Some("#billingCountry".into()),
            contains: None,
            option: "US".into(),
        };
        assert_eq!(step.name(), "select:#billingCountry=US");
        assert_eq!(
            Step::AssertText { text: "Card deleted.".into() }.name(),
            "assert_text:\"Card deleted.\""
        );
    }

    #[test]
    fn test_load_all_sorted_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: second\ntags: [smoke]\nsteps:\n  - action: visit\n    path: /\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: first\nsteps:\n  - action: visit\n    path: /\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        let names: Vec<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(Scenario::filter_by_tag(&scenarios, "smoke").len(), 1);

        std::fs::write(
            dir.path().join("c.yaml"),
            "name: first\nsteps:\n  - action: visit\n    path: /\n",
        )
        .unwrap();
        assert!(Scenario::load_all(dir.path()).is_err());
    }
}
