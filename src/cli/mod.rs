//! CE-017: CLI subcommands. init, validate, plan, apply, destroy, status, schema.

use crate::core::executor::{ApplyOptions, ApplyReport, CancelHandle, DestroyReport, Driver};
use crate::core::types::{Plan, PlanAction, PlanWarning};
use crate::core::{params, planner, resolver, state, topology};
use crate::provider::local::LocalProvider;
use crate::provider::CloudProvider;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Plan output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new csenv project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate csenv.yaml and the topology it declares
    Validate {
        /// Path to csenv.yaml
        #[arg(short, long, default_value = "csenv.yaml")]
        file: PathBuf,
    },

    /// Show the ordered plan (diff declared vs lock)
    Plan {
        /// Path to csenv.yaml
        #[arg(short, long, default_value = "csenv.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Provision the topology
    Apply {
        /// Path to csenv.yaml
        #[arg(short, long, default_value = "csenv.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Maximum concurrent provider calls
        #[arg(short, long, default_value_t = 4)]
        parallelism: usize,

        /// Stop issuing provider calls after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Show the plan without provisioning anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Tear the topology down in reverse order
    Destroy {
        /// Path to csenv.yaml
        #[arg(short, long, default_value = "csenv.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Destroy only this entity (refused while dependents are live)
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// Show current state from the lock file
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print the JSON schema of csenv.yaml
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            state_dir,
            format,
        } => cmd_plan(&file, &state_dir, format),
        Commands::Apply {
            file,
            state_dir,
            parallelism,
            timeout,
            dry_run,
        } => cmd_apply(
            &file,
            &state_dir,
            parallelism,
            timeout.map(Duration::from_secs),
            dry_run,
        ),
        Commands::Destroy {
            file,
            state_dir,
            resource,
        } => cmd_destroy(&file, &state_dir, resource.as_deref()),
        Commands::Status { state_dir } => cmd_status(&state_dir),
        Commands::Schema => cmd_schema(),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("csenv.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"name: csenv
# IAM ARN of the managed environment owner (required)
ownerIdentity: arn:aws:iam::123456789012:user/change-me
additionalOwners: []

region: us-east-1
networkAddressBlock: 10.1.0.0/16
azCount: 3
subnetMask: 22

instanceSizeBastion: t3.medium
bastionCpuType: x86_64
instanceSizeEnvironment: t3.large

instanceSizeSearch: m6g.large.search
searchMasterNodeSize: m6g.large.search
searchDataNodeCount: 2
searchZoneCount: 2
searchEngineVersion: OpenSearch_1.0
searchRemovalPolicy: destroy
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized csenv project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let params = params::parse_params_file(file)?;
    let errors = params::validate_params(&params);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!("{} validation error(s)", errors.len()));
    }

    let decls = topology::declare(&params).map_err(|e| e.to_string())?;
    let assembly = resolver::assemble(&decls).map_err(|e| e.to_string())?;
    print_warnings(&assembly.warnings);
    println!(
        "OK: {} ({} entities, {} zones, {} warning(s))",
        params.name,
        decls.len(),
        params.zones().len(),
        assembly.warnings.len()
    );
    Ok(())
}

/// Parse parameters and build the plan against the current lock.
fn load_plan(file: &Path, state_dir: &Path) -> Result<Plan, String> {
    let params = params::parse_params_file(file)?;
    let lock = state::load_lock(state_dir)?;
    planner::plan_topology(&params, lock.as_ref()).map_err(|e| e.to_string())
}

fn cmd_plan(file: &Path, state_dir: &Path, format: OutputFormat) -> Result<(), String> {
    let plan = load_plan(file, state_dir)?;
    match format {
        OutputFormat::Text => print_plan(&plan),
        OutputFormat::Json => println!("{}", planner::plan_to_json(&plan)?),
        OutputFormat::Yaml => print!("{}", planner::plan_to_yaml(&plan)?),
    }
    Ok(())
}

fn print_warnings(warnings: &[PlanWarning]) {
    for w in warnings {
        eprintln!("  WARNING [{}] {}: {}", w.code, w.entity, w.message);
    }
}

/// Display a plan to stdout.
fn print_plan(plan: &Plan) {
    println!("Planning: {} ({} entities)", plan.name, plan.entities.len());
    println!();
    for p in &plan.entities {
        let symbol = match p.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::NoOp => " ",
        };
        println!(
            "  {} {:>2}. {} [{}]: {}",
            symbol,
            p.position + 1,
            p.name(),
            p.kind(),
            planner::describe(&p.entity)
        );
        if !p.dependencies.is_empty() {
            println!("         after: {}", p.dependencies.join(", "));
        }
    }
    if !plan.warnings.is_empty() {
        println!();
        print_warnings(&plan.warnings);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged.",
        plan.to_create, plan.to_update, plan.unchanged
    );
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))
}

/// Cancel the handle on Ctrl-C.
fn cancel_on_interrupt(cancel: &CancelHandle) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: finishing in-flight calls...");
            cancel.cancel();
        }
    });
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    parallelism: usize,
    deadline: Option<Duration>,
    dry_run: bool,
) -> Result<(), String> {
    let plan = load_plan(file, state_dir)?;
    if dry_run {
        print_plan(&plan);
        println!("Dry run: no changes applied.");
        return Ok(());
    }

    let provider: Arc<dyn CloudProvider> = Arc::new(LocalProvider::open(state_dir)?);
    let driver = Driver::new(provider);
    let options = ApplyOptions {
        parallelism,
        deadline,
        event_dir: Some(state_dir.to_path_buf()),
    };
    let cancel = CancelHandle::new();
    let report = runtime()?.block_on(async {
        cancel_on_interrupt(&cancel);
        driver.apply(&plan, &options, &cancel).await
    });
    print_apply_report(&plan, &report);

    if !report.failures.is_empty() {
        return Err(format!("{} resource(s) failed", report.failures.len()));
    }
    if !report.is_success() {
        return Err(format!(
            "apply {}: {} resource(s) not attempted",
            if report.timed_out { "timed out" } else { "cancelled" },
            report.not_attempted.len()
        ));
    }
    Ok(())
}

fn print_apply_report(plan: &Plan, report: &ApplyReport) {
    for identity in &report.succeeded {
        let action = plan
            .get(&identity.name)
            .map(|p| p.action)
            .unwrap_or(PlanAction::Create);
        println!("  ok    {} ({}) {}", identity.name, identity.id, action);
    }
    for f in &report.failures {
        println!("  FAIL  {}: {}", f.entity, f.reason);
    }
    for name in &report.not_attempted {
        println!("  skip  {}", name);
    }
    println!();
    println!(
        "Apply {}: {} converged, {} failed, {} not attempted ({:.1}s, run {})",
        if report.is_success() { "complete" } else { "stopped" },
        report.succeeded.len(),
        report.failures.len(),
        report.not_attempted.len(),
        report.duration.as_secs_f64(),
        report.run_id
    );
}

fn cmd_destroy(file: &Path, state_dir: &Path, resource: Option<&str>) -> Result<(), String> {
    let plan = load_plan(file, state_dir)?;
    let provider: Arc<dyn CloudProvider> = Arc::new(LocalProvider::open(state_dir)?);
    let driver = Driver::new(provider);
    let rt = runtime()?;

    if let Some(name) = resource {
        let destroyed = rt
            .block_on(driver.destroy_entity(&plan, name))
            .map_err(|e| e.to_string())?;
        match destroyed {
            Some(identity) => println!("Destroyed {} ({})", identity.name, identity.id),
            None => println!("{} is not live; nothing to destroy.", name),
        }
        return Ok(());
    }

    let options = ApplyOptions {
        parallelism: 1,
        deadline: None,
        event_dir: Some(state_dir.to_path_buf()),
    };
    let cancel = CancelHandle::new();
    let report = rt.block_on(async {
        cancel_on_interrupt(&cancel);
        driver.destroy(&plan, &options, &cancel).await
    });
    print_destroy_report(&report);
    match report.failure {
        Some(f) => Err(f.to_string()),
        None if report.cancelled => Err("destroy cancelled".to_string()),
        None => Ok(()),
    }
}

fn print_destroy_report(report: &DestroyReport) {
    for identity in &report.destroyed {
        println!("  destroyed  {} ({})", identity.name, identity.id);
    }
    for name in &report.retained {
        println!("  retained   {}", name);
    }
    if let Some(ref f) = report.failure {
        println!("  FAIL       {}: {}", f.entity, f.reason);
    }
    println!();
    println!(
        "Destroy {}: {} destroyed, {} retained, {} not attempted.",
        if report.is_success() { "complete" } else { "stopped" },
        report.destroyed.len(),
        report.retained.len(),
        report.not_attempted.len()
    );
}

fn cmd_status(state_dir: &Path) -> Result<(), String> {
    let Some(lock) = state::load_lock(state_dir)? else {
        println!("No state found. Run `csenv apply` first.");
        return Ok(());
    };
    println!("Lock: {}", state::lock_file_path(state_dir).display());
    println!("  Generated: {}", lock.generated_at);
    println!("  Generator: {}", lock.generator);
    println!("  Resources: {}", lock.resources.len());
    for (name, rl) in &lock.resources {
        let applied = rl
            .applied_at
            .as_deref()
            .map(|t| format!(" at {}", t))
            .unwrap_or_default();
        println!("    {}: [{}] {}{}", name, rl.kind, rl.id, applied);
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    println!("{}", params::params_schema()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = "ownerIdentity: arn:aws:iam::123456789012:user/alice\n";

    fn project(params: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("csenv.yaml");
        std::fs::write(&file, params).unwrap();
        let state_dir = dir.path().join("state");
        (dir, file, state_dir)
    }

    #[test]
    fn test_ce017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("csenv.yaml").exists());
        assert!(sub.join("state").is_dir());
        // The template parses with every field known
        let params = params::parse_params_file(&sub.join("csenv.yaml")).unwrap();
        assert_eq!(params.az_count, 3);
    }

    #[test]
    fn test_ce017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("csenv.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_ce017_validate_valid() {
        let (_dir, file, _) = project(PARAMS);
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_ce017_validate_invalid_params() {
        let (_dir, file, _) = project("ownerIdentity: alice\nazCount: 0\n");
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("2 validation error(s)"));
    }

    #[test]
    fn test_ce017_validate_constraint_violation() {
        let (_dir, file, _) = project(&format!(
            "{}searchZoneCount: 3\nsearchDataNodeCount: 4\n",
            PARAMS
        ));
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("zone-redundancy-parity"));
    }

    #[test]
    fn test_ce017_plan_formats() {
        let (_dir, file, state_dir) = project(PARAMS);
        cmd_plan(&file, &state_dir, OutputFormat::Text).unwrap();
        cmd_plan(&file, &state_dir, OutputFormat::Json).unwrap();
        cmd_plan(&file, &state_dir, OutputFormat::Yaml).unwrap();
    }

    #[test]
    fn test_ce017_plan_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = cmd_plan(&dir.path().join("nope.yaml"), dir.path(), OutputFormat::Text);
        assert!(result.is_err());
    }

    #[test]
    fn test_ce017_apply_dry_run_writes_nothing() {
        let (_dir, file, state_dir) = project(PARAMS);
        cmd_apply(&file, &state_dir, 4, None, true).unwrap();
        assert!(!state::lock_file_path(&state_dir).exists());
    }

    #[test]
    fn test_ce017_apply_then_plan_unchanged() {
        let (_dir, file, state_dir) = project(PARAMS);
        cmd_apply(&file, &state_dir, 4, None, false).unwrap();

        let lock = state::load_lock(&state_dir).unwrap().unwrap();
        assert_eq!(lock.resources.len(), 13);
        assert!(lock
            .resources
            .values()
            .all(|r| r.hash.starts_with("blake3:") && r.applied_at.is_some()));
        assert!(state_dir.join("events.jsonl").exists());

        let plan = load_plan(&file, &state_dir).unwrap();
        assert_eq!(plan.unchanged, 13);
        cmd_status(&state_dir).unwrap();

        // Second apply keeps identities
        cmd_apply(&file, &state_dir, 1, None, false).unwrap();
        let again = state::load_lock(&state_dir).unwrap().unwrap();
        assert_eq!(again.resources["vpc"].id, lock.resources["vpc"].id);
    }

    #[test]
    fn test_ce017_destroy_single_fails_closed() {
        let (_dir, file, state_dir) = project(PARAMS);
        cmd_apply(&file, &state_dir, 4, None, false).unwrap();
        let err = cmd_destroy(&file, &state_dir, Some("vpc")).unwrap_err();
        assert!(err.contains("live dependents"));
        cmd_destroy(&file, &state_dir, Some("search")).unwrap();
        let lock = state::load_lock(&state_dir).unwrap().unwrap();
        assert!(!lock.resources.contains_key("search"));
    }

    #[test]
    fn test_ce017_destroy_all() {
        let (_dir, file, state_dir) = project(PARAMS);
        cmd_apply(&file, &state_dir, 4, None, false).unwrap();
        cmd_destroy(&file, &state_dir, None).unwrap();
        let lock = state::load_lock(&state_dir).unwrap().unwrap();
        assert!(lock.resources.is_empty());
    }

    #[test]
    fn test_ce017_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(dir.path()).unwrap();
    }

    #[test]
    fn test_ce017_dispatch() {
        let (dir, file, state_dir) = project(PARAMS);
        dispatch(Commands::Validate { file: file.clone() }).unwrap();
        dispatch(Commands::Plan {
            file,
            state_dir: state_dir.clone(),
            format: OutputFormat::Json,
        })
        .unwrap();
        dispatch(Commands::Status { state_dir }).unwrap();
        dispatch(Commands::Schema).unwrap();
        let sub = dir.path().join("fresh");
        dispatch(Commands::Init { path: sub.clone() }).unwrap();
        assert!(sub.join("csenv.yaml").exists());
    }
}
