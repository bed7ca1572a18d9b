use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".wikishift";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const DRY_RUN_DIR_NAME: &str = "dry-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub dry_run_dir: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub dry_run_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({}) exists={}\ndry_run_dir={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.config_path.exists(),
            normalize_for_display(&self.dry_run_dir),
            self.dry_run_source.as_str(),
        )
    }

    pub fn env_file(&self) -> PathBuf {
        self.project_root.join(".env")
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKISHIFT_CONFIG")) {
        (
            absolutize_from_project(Path::new(&value), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    let (dry_run_dir, dry_run_source) = if let Some(path) = overrides.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else {
        (state_dir.join(DRY_RUN_DIR_NAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        dry_run_dir,
        root_source,
        config_source,
        dry_run_source,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = non_empty(lookup_env("WIKISHIFT_PROJECT_ROOT")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }
    match detect_project_root(&context.cwd, context.executable_dir.as_deref()) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

/// Nearest ancestor of the cwd, then of the executable, that already holds a
/// state directory.
fn detect_project_root(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<&Path> = cwd.ancestors().collect();
    if let Some(exe_dir) = executable_dir {
        candidates.extend(exe_dir.ancestors());
    }
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(normalize_for_display(candidate)))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn absolutize_from_project(path: &Path, project_root: &Path) -> PathBuf {
    absolutize(path, project_root)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
