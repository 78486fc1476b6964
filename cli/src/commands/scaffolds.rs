use std::path::{Path, PathBuf};

use clap::Subcommand;
use pulse_core::routing::ScaffoldId;
use pulse_core::scaffold::{ScaffoldDescriptor, ScaffoldRegistry};
use pulse_mcp_runtime::scaffolds::{built_in_descriptors, load_registry, read_directory};
use serde_json::{Value, json};

use crate::util::{EXIT_OK, EXIT_REJECTED, cli_error, emit};

#[derive(Subcommand)]
pub enum ScaffoldCommands {
    /// List registered scaffolds (built-ins merged with overrides)
    List {
        /// Override directory (defaults to PULSE_SCAFFOLD_DIR)
        #[arg(long, env = "PULSE_SCAFFOLD_DIR")]
        dir: Option<PathBuf>,
    },
    /// Print one scaffold descriptor as JSON
    Show {
        /// Scaffold id (e.g. "personal_health_signal.growth")
        id: String,
        /// Override directory (defaults to PULSE_SCAFFOLD_DIR)
        #[arg(long, env = "PULSE_SCAFFOLD_DIR")]
        dir: Option<PathBuf>,
    },
    /// Lint scaffold descriptors without starting a server
    Validate {
        /// Directory of descriptor files; the built-in set is checked when omitted
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

pub fn run(command: ScaffoldCommands) -> i32 {
    match command {
        ScaffoldCommands::List { dir } => list(dir.as_deref()),
        ScaffoldCommands::Show { id, dir } => show(&id, dir.as_deref()),
        ScaffoldCommands::Validate { dir } => {
            let (report, valid) = validate(dir.as_deref());
            emit(&report, if valid { EXIT_OK } else { EXIT_REJECTED })
        }
    }
}

fn registry(dir: Option<&Path>) -> Result<ScaffoldRegistry, i32> {
    load_registry(dir).map_err(|err| {
        cli_error(
            EXIT_REJECTED,
            &format!("Failed to load scaffolds: {err}"),
            Some("Run `pulse scaffolds validate --dir <dir>` for a per-file report."),
        )
    })
}

fn list(dir: Option<&Path>) -> i32 {
    let registry = match registry(dir) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let scaffolds: Vec<Value> = registry.iter().map(summary).collect();
    emit(&json!({ "scaffolds": scaffolds }), EXIT_OK)
}

fn show(raw_id: &str, dir: Option<&Path>) -> i32 {
    let id = match raw_id.parse::<ScaffoldId>() {
        Ok(id) => id,
        Err(unknown) => {
            let hint = unknown.suggestion.map(|s| format!("Did you mean '{s}'?"));
            return cli_error(EXIT_REJECTED, &unknown.to_string(), hint.as_deref());
        }
    };
    let registry = match registry(dir) {
        Ok(r) => r,
        Err(code) => return code,
    };
    match registry.get(id).map(serde_json::to_value) {
        Some(Ok(value)) => emit(&value, EXIT_OK),
        Some(Err(e)) => cli_error(EXIT_REJECTED, &format!("Failed to encode scaffold: {e}"), None),
        None => cli_error(EXIT_REJECTED, &format!("Scaffold '{id}' is not registered"), None),
    }
}

fn summary(descriptor: &ScaffoldDescriptor) -> Value {
    json!({
        "id": descriptor.id.as_str(),
        "version": descriptor.version,
        "display_name": descriptor.display_name,
        "formats": descriptor.output.formats,
        "tone_variants": descriptor.framing.tone_variants.keys().collect::<Vec<_>>(),
        "context_exports": descriptor
            .context_exports
            .iter()
            .map(|f| f.field_name.as_str())
            .collect::<Vec<_>>(),
    })
}

/// Lint every descriptor, then check the set would register as a whole.
fn validate(dir: Option<&Path>) -> (Value, bool) {
    let loaded = match dir {
        Some(dir) => read_directory(dir),
        None => built_in_descriptors(),
    };
    let descriptors = match loaded {
        Ok(d) => d,
        Err(err) => {
            return (
                json!({ "valid": false, "error": err.to_string(), "scaffolds": [] }),
                false,
            );
        }
    };

    let mut valid = true;
    let scaffolds: Vec<Value> = descriptors
        .iter()
        .map(|descriptor| {
            let issues = descriptor.lint();
            valid &= issues.is_empty();
            json!({
                "id": descriptor.id.as_str(),
                "version": descriptor.version,
                "issues": issues,
            })
        })
        .collect();

    let mut report = json!({ "valid": valid, "scaffolds": scaffolds });
    if valid {
        if let Err(err) = load_registry(dir) {
            valid = false;
            report["valid"] = json!(false);
            report["error"] = json!(err.to_string());
        }
    }
    (report, valid)
}
