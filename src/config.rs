use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Extensions scanned when none are configured
pub const DEFAULT_EXTENSIONS: &str = "jpg,jpeg,gif,bmp,png,psd,tif,svg,tga";

pub const DEFAULT_WORKERS: usize = 3;

/// Date folders used for files that carry no root tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateLayout {
    /// `<year>/<month>`
    #[default]
    YearMonth,
    /// `<year>/<month>/<day>`
    YearMonthDay,
}

/// How many passes the empty-directory sweep makes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupMode {
    /// One deepest-first pass over the walked directories
    #[default]
    Single,
    /// Repeat the pass until it removes nothing
    UntilStable,
}

/// Everything one run needs. Read-only once the run starts.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    /// Lower-cased extensions including the leading dot
    pub extensions: HashSet<String>,
    /// Lower-cased folder name -> root tag
    pub roots: HashMap<String, String>,
    /// Lower-cased folder name -> mapped destination folder
    pub mappings: HashMap<String, String>,
    /// Lower-cased directory names pruned from the walk
    pub ignore: HashSet<String>,
    pub workers: usize,
    pub date_layout: DateLayout,
    pub cleanup: CleanupMode,
    pub dry_run: bool,
    pub delete: bool,
    pub verbose: bool,
}

impl JobConfig {
    pub fn new(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            destination: destination.into(),
            extensions: extension_set(DEFAULT_EXTENSIONS.split(',')),
            roots: HashMap::new(),
            mappings: HashMap::new(),
            ignore: HashSet::new(),
            workers: DEFAULT_WORKERS,
            date_layout: DateLayout::default(),
            cleanup: CleanupMode::default(),
            dry_run: false,
            delete: false,
            verbose: false,
        }
    }

    pub fn with_roots<S: AsRef<str>>(mut self, roots: &[S]) -> Self {
        self.roots = lookup(roots);
        self
    }

    pub fn with_mappings<S: AsRef<str>>(mut self, pairs: &[(S, S)]) -> Self {
        self.mappings = pairs
            .iter()
            .map(|(name, folder)| (name.as_ref().trim().to_lowercase(), folder.as_ref().trim().to_string()))
            .filter(|(name, folder)| !name.is_empty() && !folder.is_empty())
            .collect();
        self
    }

    pub fn with_ignore<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.ignore = lookup(names).into_keys().collect();
        self
    }

    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = extension_set(extensions.iter().map(|e| e.as_ref()));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_date_layout(mut self, layout: DateLayout) -> Self {
        self.date_layout = layout;
        self
    }

    pub fn with_cleanup(mut self, mode: CleanupMode) -> Self {
        self.cleanup = mode;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn delete_after_copy(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check the job before any work starts. Failures here end the run.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("at least one source directory must be specified");
        }
        if self.destination.as_os_str().is_empty() {
            bail!("a destination directory must be specified");
        }
        if self.workers == 0 {
            bail!("worker count must be at least 1");
        }
        if self.extensions.is_empty() {
            bail!("no file extensions to scan for");
        }
        if self.destination.exists() && !self.destination.is_dir() {
            bail!("destination {} is not a directory", self.destination.display());
        }

        let destination = absolute(&self.destination)?;
        for source in &self.sources {
            if !source.is_dir() {
                bail!("source {} does not exist or is not a directory", source.display());
            }
            let source = source
                .canonicalize()
                .with_context(|| format!("Failed to resolve source {}", source.display()))?;
            if destination.starts_with(&source) {
                bail!(
                    "destination {} lies inside source {}",
                    destination.display(),
                    source.display()
                );
            }
        }
        Ok(())
    }
}

/// Settings as they arrive from a job file or the command line, before the
/// lookups are built
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSettings {
    pub sources: Vec<PathBuf>,
    /// Only these subfolders of each source are scanned
    pub subfolders: Vec<String>,
    pub destination: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub roots: Vec<String>,
    pub mappings: HashMap<String, String>,
    pub ignore: Vec<String>,
    pub workers: Option<usize>,
    pub date_layout: Option<DateLayout>,
    pub cleanup: Option<CleanupMode>,
    pub dry_run: bool,
    pub delete: bool,
    pub verbose: bool,
}

impl JobSettings {
    /// Load settings from a JSON job file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse job file {}", path.display()))
    }

    /// Overlay `other` on top of `self`; values set in `other` win
    pub fn merge(mut self, other: JobSettings) -> Self {
        if !other.sources.is_empty() {
            self.sources = other.sources;
        }
        if !other.subfolders.is_empty() {
            self.subfolders = other.subfolders;
        }
        if other.destination.is_some() {
            self.destination = other.destination;
        }
        if !other.extensions.is_empty() {
            self.extensions = other.extensions;
        }
        if !other.roots.is_empty() {
            self.roots = other.roots;
        }
        self.mappings.extend(other.mappings);
        if !other.ignore.is_empty() {
            self.ignore = other.ignore;
        }
        self.workers = other.workers.or(self.workers);
        self.date_layout = other.date_layout.or(self.date_layout);
        self.cleanup = other.cleanup.or(self.cleanup);
        self.dry_run |= other.dry_run;
        self.delete |= other.delete;
        self.verbose |= other.verbose;
        self
    }

    pub fn into_config(self) -> Result<JobConfig> {
        let Some(destination) = self.destination else {
            bail!("a destination directory must be specified");
        };

        let sources = if self.subfolders.is_empty() {
            self.sources
        } else {
            self.sources
                .iter()
                .flat_map(|base| {
                    self.subfolders
                        .iter()
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(move |sub| base.join(sub))
                })
                .collect()
        };

        let mappings: Vec<(String, String)> = self.mappings.into_iter().collect();
        let mut config = JobConfig::new(sources, destination)
            .with_roots(&self.roots)
            .with_mappings(&mappings)
            .with_ignore(&self.ignore)
            .with_workers(self.workers.unwrap_or(DEFAULT_WORKERS))
            .with_date_layout(self.date_layout.unwrap_or_default())
            .with_cleanup(self.cleanup.unwrap_or_default())
            .dry_run(self.dry_run)
            .delete_after_copy(self.delete)
            .verbose(self.verbose);
        if !self.extensions.is_empty() {
            config = config.with_extensions(&self.extensions);
        }
        Ok(config)
    }
}

/// Build a case-insensitive lookup: lower-cased name -> name as given
pub fn lookup<S: AsRef<str>>(names: &[S]) -> HashMap<String, String> {
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .map(|n| (n.to_lowercase(), n.to_string()))
        .collect()
}

/// Parse `name=folder` pairs
pub fn parse_mapping(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((name, folder)) if !name.trim().is_empty() && !folder.trim().is_empty() => {
            Ok((name.trim().to_string(), folder.trim().to_string()))
        }
        _ => bail!("invalid folder mapping '{}', expected name=folder", pair),
    }
}

fn extension_set<'a>(extensions: impl Iterator<Item = &'a str>) -> HashSet<String> {
    extensions
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
        .collect()
}

/// Absolute form of `path` with `.` and `..` folded, following symlinks in
/// the part of it that already exists
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(path)
    };

    // resolve the deepest part that exists, then apply the rest lexically
    let parts: Vec<Component> = joined.components().collect();
    let mut split = parts.len();
    while split > 0 && !parts[..split].iter().collect::<PathBuf>().exists() {
        split -= 1;
    }
    let mut resolved = if split == 0 {
        PathBuf::new()
    } else {
        let existing: PathBuf = parts[..split].iter().collect();
        existing
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", existing.display()))?
    };
    for part in &parts[split..] {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}
