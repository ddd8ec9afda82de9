//! Reset command - flush and reseed the test data without running scenarios

use anyhow::Result;
use nomad_e2e::{HarnessConfig, ResetHook};

use crate::output;

pub async fn execute(config: HarnessConfig) -> Result<bool> {
    if !config.reset.enabled {
        output::print_warning("reset.enabled is false; nothing to do");
        return Ok(true);
    }

    let hook = ResetHook::new(config.reset)?;
    let report = hook.run().await?;
    output::print_success(&format!(
        "Test data reset in {} ms ({})",
        report.elapsed.as_millis(),
        hook.command_line()
    ));
    Ok(true)
}
