use crate::metrics_defs::{ARTIFACTS_WRITTEN, GENERATED_FILES_PURGED};
use crate::model::RenderedArtifact;
use crate::template::{Context, Template, TemplateError};
use shared::counter;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// First-line prefix of every file this crate generates. Files starting with
/// it are owned by the generator and deleted before each run; anything else
/// under the output root is left alone.
pub const GENERATED_MARKER: &str = "# Code generated";

/// Per-directory index consumed by the downstream kustomize build.
pub const INDEX_FILE_NAME: &str = "kustomization.yaml";

const INDEX_TEMPLATE: &str = include_str!("../templates/kustomization.yaml.tpl");

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk output tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("cannot compute output path for {artifact}: {source}")]
    OutputPath {
        artifact: String,
        #[source]
        source: TemplateError,
    },

    #[error("output path {} for {artifact} escapes the output root", path.display())]
    OutsideRoot { artifact: String, path: PathBuf },

    #[error("artifacts with different content write to {}", path.display())]
    Conflict { path: PathBuf },

    #[error("failed to render index for {}: {source}", dir.display())]
    Index {
        dir: PathBuf,
        #[source]
        source: TemplateError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub purged: usize,
    pub written: Vec<PathBuf>,
    pub indexes: Vec<PathBuf>,
}

/// Owns one generated output tree.
pub struct ArtifactWriter {
    root: PathBuf,
    index: Option<Template>,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        Ok(ArtifactWriter {
            root: root.into(),
            index: Some(Template::parse("kustomization", INDEX_TEMPLATE)?),
        })
    }

    /// Skip emitting per-directory index files.
    pub fn without_index(mut self) -> Self {
        self.index = None;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replaces every generated file under the root with `artifacts`.
    ///
    /// All output paths are computed before anything is touched, so a bad
    /// artifact leaves the previous tree intact. Artifacts landing on the same
    /// path are written once when their content matches and rejected otherwise.
    pub fn write_all(&self, artifacts: &[RenderedArtifact]) -> Result<WriteSummary, WriteError> {
        let mut seen: HashMap<PathBuf, &str> = HashMap::new();
        let mut planned = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let path = self.output_path(artifact)?;
            match seen.entry(path.clone()) {
                Entry::Occupied(first) if *first.get() == artifact.content => {
                    tracing::debug!(path = %path.display(), "Skipping identical {artifact}");
                }
                Entry::Occupied(_) => return Err(WriteError::Conflict { path }),
                Entry::Vacant(slot) => {
                    slot.insert(&artifact.content);
                    planned.push((path, artifact));
                }
            }
        }

        let purged = self.purge_generated()?;

        let mut written = Vec::with_capacity(planned.len());
        for (path, artifact) in planned {
            write_file(&path, &artifact.content)?;
            counter!(ARTIFACTS_WRITTEN, "cloud_provider" => artifact.cloud_provider.as_str())
                .increment(1);
            tracing::debug!(path = %path.display(), "Wrote {artifact}");
            written.push(path);
        }

        let indexes = self.write_indexes()?;

        Ok(WriteSummary {
            purged,
            written,
            indexes,
        })
    }

    /// Computes where `artifact` is written. The directory template may only
    /// reference `tenant_id`, `cloud_provider`, `account_id` and `region`.
    pub fn output_path(&self, artifact: &RenderedArtifact) -> Result<PathBuf, WriteError> {
        let output_path_error = |source| WriteError::OutputPath {
            artifact: artifact.to_string(),
            source,
        };

        let template = Template::parse("output-path", &artifact.directory_template)
            .map_err(output_path_error)?;
        let context = Context::new()
            .with("tenant_id", &artifact.tenant_id)
            .with("cloud_provider", artifact.cloud_provider.as_str())
            .with("account_id", &artifact.account_id)
            .with("region", &artifact.region);
        let directory = template.render(&context).map_err(output_path_error)?;

        let relative = Path::new(&directory).join(artifact.file_name());
        let stays_inside = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !stays_inside {
            return Err(WriteError::OutsideRoot {
                artifact: artifact.to_string(),
                path: relative,
            });
        }

        Ok(self.root.join(relative))
    }

    /// Deletes every generated file under the root and returns how many were removed.
    pub fn purge_generated(&self) -> Result<usize, WriteError> {
        if !self.root_exists()? {
            return Ok(0);
        }

        let mut generated = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if entry.file_type().is_file() && is_generated(entry.path())? {
                generated.push(entry.into_path());
            }
        }

        for path in &generated {
            fs::remove_file(path).map_err(io_error(path))?;
        }

        counter!(GENERATED_FILES_PURGED).increment(generated.len() as u64);
        Ok(generated.len())
    }

    /// Writes an index file into every directory holding manifests. An index
    /// that is not generated is left as it is.
    pub fn write_indexes(&self) -> Result<Vec<PathBuf>, WriteError> {
        let Some(template) = &self.index else {
            return Ok(Vec::new());
        };
        if !self.root_exists()? {
            return Ok(Vec::new());
        }

        let mut indexes = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();

            let manifests = list_manifests(dir)?;
            if manifests.is_empty() {
                continue;
            }

            let path = dir.join(INDEX_FILE_NAME);
            if path.try_exists().map_err(io_error(&path))? && !is_generated(&path)? {
                tracing::warn!(path = %path.display(), "Keeping hand-written index");
                continue;
            }

            let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
            let name_prefix = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("-");
            let name_prefix = match name_prefix.is_empty() {
                true => String::new(),
                false => format!("{name_prefix}-"),
            };
            let resources = manifests
                .iter()
                .map(|name| format!("  - {name}"))
                .collect::<Vec<_>>()
                .join("\n");

            let context = Context::new()
                .with("name_prefix", name_prefix)
                .with("resources", resources);
            let content = template
                .render(&context)
                .map_err(|source| WriteError::Index {
                    dir: dir.to_path_buf(),
                    source,
                })?;

            write_file(&path, &content)?;
            indexes.push(path);
        }

        Ok(indexes)
    }

    fn root_exists(&self) -> Result<bool, WriteError> {
        self.root.try_exists().map_err(io_error(&self.root))
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, content).map_err(io_error(path))
}

/// Sorted names of the `.yaml` files in `dir`, excluding the index itself.
fn list_manifests(dir: &Path) -> Result<Vec<String>, WriteError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let file_type = entry.file_type().map_err(io_error(&entry.path()))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".yaml") && name != INDEX_FILE_NAME {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn is_generated(path: &Path) -> Result<bool, WriteError> {
    let file = fs::File::open(path).map_err(io_error(path))?;
    let mut first_line = Vec::new();
    BufReader::new(file)
        .read_until(b'\n', &mut first_line)
        .map_err(io_error(path))?;
    Ok(first_line.starts_with(GENERATED_MARKER.as_bytes()))
}
