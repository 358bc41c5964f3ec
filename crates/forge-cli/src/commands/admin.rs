use anyhow::Result;
use forge_core::AppConfig;
use serde_json::json;
use std::path::Path;

use crate::ConfigArgs;
use crate::output::{print_json, redact_config_for_display};

/// `forge config`: write default project settings when none exist;
/// `--show` prints the merged, redacted configuration instead.
pub(crate) fn run_config(workspace: &Path, args: ConfigArgs, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    if args.show {
        let display_cfg = redact_config_for_display(&cfg)?;
        if json_mode {
            print_json(&display_cfg)?;
        } else {
            println!("{}", serde_json::to_string_pretty(&display_cfg)?);
        }
        return Ok(());
    }

    let path = AppConfig::project_settings_path(workspace);
    let created = !path.exists();
    if created {
        AppConfig::default().save(workspace)?;
    }
    if json_mode {
        print_json(&json!({ "path": path, "created": created }))?;
    } else if created {
        println!("wrote {}", path.display());
    } else {
        println!("settings already exist at {}", path.display());
    }
    Ok(())
}
