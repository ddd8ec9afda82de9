//! Run command - execute scenarios in a real browser over WebDriver

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nomad_e2e::config::BrowserKind;
use nomad_e2e::driver::WebDriverFactory;
use nomad_e2e::{preflight, HarnessConfig, TestRunner};
use tracing::info;
use url::Url;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Scenario directory
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Do not reset test data before scenarios
    #[arg(long)]
    pub no_reset: bool,

    /// Application base URL
    #[arg(long, env = "NOMAD_E2E_BASE_URL")]
    pub base_url: Option<String>,

    /// WebDriver server URL
    #[arg(long, env = "NOMAD_E2E_WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,

    /// Browser to use (chrome, firefox)
    #[arg(long)]
    pub browser: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Skip waiting for the application and WebDriver server
    #[arg(long)]
    pub skip_preflight: bool,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl RunArgs {
    /// Command-line flags take precedence over the config file.
    fn apply(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(dir) = &self.scenarios {
            config.output.scenarios_dir = dir.clone();
        }
        if let Some(dir) = &self.output {
            config.output.results_dir = dir.clone();
        }
        if let Some(url) = &self.base_url {
            config.app.base_url = url.clone();
        }
        if let Some(url) = &self.webdriver_url {
            config.browser.webdriver_url = url.clone();
        }
        if let Some(browser) = &self.browser {
            config.browser.browser = browser
                .parse::<BrowserKind>()
                .with_context(|| format!("invalid --browser '{browser}'"))?;
        }
        if self.headed {
            config.browser.headless = false;
        }
        config.validate()?;
        Ok(())
    }
}

pub async fn execute(args: RunArgs, mut config: HarnessConfig) -> Result<bool> {
    args.apply(&mut config)?;

    if !args.skip_preflight {
        let policy = config.wait.navigation_policy();
        preflight::wait_for_app(&config.app.base_url()?, &policy).await?;
        let webdriver = Url::parse(&config.browser.webdriver_url)?;
        preflight::wait_for_webdriver(&webdriver, &policy).await?;
    }

    info!(
        "Using {} via {}",
        config.browser.browser.as_str(),
        config.browser.webdriver_url
    );
    let factory = WebDriverFactory::new(config.browser.clone());
    let mut runner = TestRunner::new(config, factory)?;
    if args.no_reset {
        runner = runner.without_reset();
    }

    let suite = if let Some(name) = &args.name {
        runner.run_test(name).await?
    } else if let Some(tag) = &args.tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&suite)?;
    output::print_suite(&suite, args.format);

    Ok(suite.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cmd {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_flags_override_config() {
        let cmd = Cmd::parse_from([
            "run",
            "--base-url",
            "http://127.0.0.1:9000",
            "--browser",
            "firefox",
            "--headed",
            "--scenarios",
            "smoke",
        ]);
        let mut config = HarnessConfig::default();
        cmd.run.apply(&mut config).unwrap();

        assert_eq!(config.app.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.browser.browser, BrowserKind::Firefox);
        assert!(!config.browser.headless);
        assert_eq!(config.output.scenarios_dir, PathBuf::from("smoke"));
    }

    #[test]
    fn test_rejects_unknown_browser() {
        let cmd = Cmd::parse_from(["run", "--browser", "netscape"]);
        let mut config = HarnessConfig::default();
        assert!(cmd.run.apply(&mut config).is_err());
    }
}
