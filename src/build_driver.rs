//! Build driver: invokes the underlying native build tool to configure,
//! build, and install one package in one configuration into a target
//! prefix. The only production implementation spawns a child process and
//! captures its stdout/stderr with two background reader threads, joined
//! before the call returns (the engine's only concurrency, per the
//! concurrency model).

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::info;

use crate::args::NormalizedArgs;
use crate::error::{Result, ScaffoldError};
use crate::model::ConfigName;

pub struct DriverOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Hijack-shim-module files the install step wrote, used by the
    /// resolver to emit find-module shadowing.
    pub installed_hijack_modules: Vec<PathBuf>,
}

pub trait BuildDriver {
    fn configure(
        &self,
        package: &str,
        source_dir: &Path,
        build_dir: &Path,
        config: &ConfigName,
        args: &NormalizedArgs,
    ) -> Result<DriverOutput>;

    fn build(
        &self,
        package: &str,
        build_dir: &Path,
        config: &ConfigName,
        targets: &[String],
        extra_args: &[String],
    ) -> Result<DriverOutput>;

    fn install(
        &self,
        package: &str,
        build_dir: &Path,
        config: &ConfigName,
    ) -> Result<DriverOutput>;
}

/// The command template used to invoke the underlying native build tool,
/// e.g. `cmake`. Kept configurable rather than hardcoded so the driver can
/// target whatever build tool the dependency script expects.
pub struct ProcessBuildDriver {
    pub build_tool: String,
    pub log_dir: PathBuf,
}

impl ProcessBuildDriver {
    pub fn new(build_tool: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        ProcessBuildDriver {
            build_tool: build_tool.into(),
            log_dir: log_dir.into(),
        }
    }

    fn run(&self, package: &str, step: &str, args: &[String], cwd: &Path) -> Result<DriverOutput> {
        std::fs::create_dir_all(&self.log_dir)?;
        let log_path = self.log_dir.join(format!("{package}-{step}.log"));

        let mut child = Command::new(&self.build_tool)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScaffoldError::Build(format!("failed to spawn {}: {e}", self.build_tool)))?;

        let stdout_pipe = child.stdout.take().expect("piped stdout");
        let stderr_pipe = child.stderr.take().expect("piped stderr");
        let log_path_out = log_path.clone();
        let log_path_err = log_path.clone();

        let stdout_thread = thread::spawn(move || tee_lines(stdout_pipe, &log_path_out));
        let stderr_thread = thread::spawn(move || tee_lines(stderr_pipe, &log_path_err));

        let status = child
            .wait()
            .map_err(|e| ScaffoldError::Build(format!("failed to wait on {}: {e}", self.build_tool)))?;

        let stdout = stdout_thread
            .join()
            .map_err(|_| ScaffoldError::Build("stdout reader thread panicked".into()))??;
        let stderr = stderr_thread
            .join()
            .map_err(|_| ScaffoldError::Build("stderr reader thread panicked".into()))??;

        info!("{package} [{step}] exited with {status}");

        Ok(DriverOutput {
            stdout,
            stderr,
            success: status.success(),
            installed_hijack_modules: Vec::new(),
        })
    }
}

fn tee_lines(pipe: impl std::io::Read, log_path: &Path) -> Result<String> {
    let mut log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let reader = BufReader::new(pipe);
    let mut captured = String::new();
    for line in reader.lines() {
        let line = line?;
        writeln!(log_file, "{line}")?;
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}

impl BuildDriver for ProcessBuildDriver {
    fn configure(
        &self,
        package: &str,
        source_dir: &Path,
        build_dir: &Path,
        _config: &ConfigName,
        args: &NormalizedArgs,
    ) -> Result<DriverOutput> {
        std::fs::create_dir_all(build_dir)?;
        let mut cli_args: Vec<String> = args
            .as_slice()
            .iter()
            .map(|a| match &a.type_ {
                Some(t) => format!("{}{}:{}={}", a.switch, a.name, t, a.value),
                None => format!("{}{}={}", a.switch, a.name, a.value),
            })
            .collect();
        cli_args.push(source_dir.to_string_lossy().to_string());
        self.run(package, "configure", &cli_args, build_dir)
    }

    fn build(
        &self,
        package: &str,
        build_dir: &Path,
        _config: &ConfigName,
        targets: &[String],
        extra_args: &[String],
    ) -> Result<DriverOutput> {
        let mut args = vec!["--build".to_string(), ".".to_string()];
        for t in targets {
            args.push("--target".to_string());
            args.push(t.clone());
        }
        args.extend(extra_args.iter().cloned());
        self.run(package, "build", &args, build_dir)
    }

    fn install(&self, package: &str, build_dir: &Path, _config: &ConfigName) -> Result<DriverOutput> {
        let args = vec!["--build".to_string(), ".".to_string(), "--target".to_string(), "install".to_string()];
        let mut output = self.run(package, "install", &args, build_dir)?;
        if output.success {
            output.installed_hijack_modules = scan_hijack_modules(build_dir);
        }
        Ok(output)
    }
}

fn scan_hijack_modules(build_dir: &Path) -> Vec<PathBuf> {
    let hijack_dir = build_dir.join("_cmakex").join("hijack");
    if !hijack_dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(&hijack_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}
