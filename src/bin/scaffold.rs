use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use scaffold::build_driver::ProcessBuildDriver;
use scaffold::clone::GitCloneDriver;
use scaffold::config::{EngineConfig, EngineInvocation, FileDefaults};
use scaffold::dep_script;
use scaffold::model::{ConfigName, UpdatePolicy};
use scaffold::plan_executor::PlanExecutor;
use scaffold::resolver::Resolver;

/// Resolves, clones/updates, and builds every dependency a project
/// declares before the project itself is configured and built.
#[derive(Parser)]
#[command(name = "scaffold", about = "dependency resolution and incremental rebuild engine")]
struct Cli {
    /// Directory containing the main project's source.
    #[arg(long)]
    source_dir: PathBuf,

    /// Directory the engine uses for clones, build dirs, and the install prefix.
    #[arg(long)]
    binary_dir: PathBuf,

    /// Build configurations to resolve (e.g. Debug, Release). Defaults to NoConfig.
    #[arg(long = "config", value_name = "NAME")]
    configs: Vec<String>,

    /// Build-tool arguments forwarded to every dependency's configure step.
    #[arg(long = "arg", value_name = "ARG")]
    build_tool_args: Vec<String>,

    /// Path to an executable dependency script whose stdout is decoded as directives.
    #[arg(long)]
    dependency_script: Option<PathBuf>,

    /// Update policy: off, if_clean, if_very_clean, all_clean, all_very_clean, force.
    #[arg(long, default_value = "off")]
    update_policy: String,

    /// Force rebuild of every cloned package regardless of install status.
    #[arg(long)]
    force_build: bool,

    /// Discard downloaded include directories before resolving.
    #[arg(long)]
    clear_downloaded_includes: bool,

    /// Use one build directory per package instead of one per (package, config).
    #[arg(long)]
    single_build_dir: bool,

    #[arg(long)]
    deps_dir: Option<PathBuf>,

    #[arg(long)]
    deps_build_dir: Option<PathBuf>,

    #[arg(long)]
    deps_install_dir: Option<PathBuf>,

    /// Native build tool to invoke for configure/build/install (e.g. cmake).
    #[arg(long, default_value = "cmake")]
    build_tool: String,

    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let defaults = FileDefaults::load().context("failed to load scaffold.toml defaults")?;

    let update_policy_token = if cli.update_policy == "off" {
        defaults.update_policy.clone().unwrap_or(cli.update_policy.clone())
    } else {
        cli.update_policy.clone()
    };
    let update_policy = UpdatePolicy::parse(&update_policy_token)
        .context("failed to parse --update-policy")?;

    let configs: Vec<ConfigName> = if cli.configs.is_empty() {
        vec![ConfigName::new("")]
    } else {
        cli.configs.iter().map(ConfigName::new).collect()
    };

    let invocation = EngineInvocation {
        source_dir: cli.source_dir.clone(),
        binary_dir: cli.binary_dir.clone(),
        configs: configs.clone(),
        build_tool_args: cli.build_tool_args.clone(),
        dependency_script: cli.dependency_script.clone(),
        update_policy,
        force_build: cli.force_build || defaults.force_build.unwrap_or(false),
        clear_downloaded_includes: cli.clear_downloaded_includes,
        single_build_dir: cli.single_build_dir || defaults.single_build_dir.unwrap_or(false),
        deps_dir_override: cli.deps_dir.clone(),
        deps_build_dir_override: cli.deps_build_dir.clone(),
        deps_install_dir_override: cli.deps_install_dir.clone(),
        verbose: cli.verbose,
    };

    let engine_config = EngineConfig::from_invocation(&invocation);

    let mut requests = Vec::new();
    if let Some(script_path) = &invocation.dependency_script {
        let output = std::process::Command::new(script_path)
            .output()
            .with_context(|| format!("failed to execute dependency script {}", script_path.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        requests.extend(
            dep_script::parse_directives(&stdout, &invocation.source_dir)
                .context("failed to parse dependency script output")?,
        );
    }

    for req in &mut requests {
        if req.build.configs.is_empty() {
            req.build.configs = configs.iter().cloned().collect();
        }
    }

    let clone_driver = GitCloneDriver::new();
    let build_tool = defaults.build_tool.clone().unwrap_or(cli.build_tool.clone());
    let build_driver = ProcessBuildDriver::new(build_tool, engine_config.deps_build_dir.join("_logs"));

    let resolver = Resolver::new(&engine_config, &clone_driver, &build_driver);
    let mut workspace = scaffold::model::ResolverWorkspace::new(
        update_policy,
        invocation.force_build,
        invocation.clear_downloaded_includes,
    );

    resolver.run(requests, &mut workspace).context("dependency resolution failed")?;

    if workspace.build_order.is_empty() {
        println!("all dependencies satisfied; nothing to build");
        return Ok(());
    }

    println!(
        "build order: {}",
        workspace
            .build_order
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let executor = PlanExecutor::new(&engine_config, &build_driver);
    executor.execute(&workspace).context("dependency build failed")?;

    println!("all dependencies resolved and built");
    Ok(())
}
