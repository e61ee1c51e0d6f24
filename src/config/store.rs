//! Durable configuration store: load, validate, atomically persist.
//!
//! Writers go through `save`, which backs up the current file, writes a
//! temp file next to it and renames into place. Rename is atomic on the
//! same filesystem, so readers observe either the old or the new document,
//! never a partial write. Concurrent saves are serialised by a
//! store-internal mutex.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use crate::errors::{Error, Result};

use super::model::{Config, Project, ProjectDescriptor};
use super::paths::Paths;
use super::validate::validate;

/// Owns access to the on-disk config document.
pub struct ConfigStore {
    paths: Paths,
    save_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths, save_lock: Mutex::new(()) }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Read, parse and validate the config file. Parse errors carry the
    /// YAML parser's location information; validation errors are aggregated.
    pub fn load(&self) -> Result<Config> {
        let cfg = self.load_raw()?;
        let errs = validate(&cfg);
        if !errs.is_empty() {
            return Err(Error::validation(errs));
        }
        Ok(cfg)
    }

    /// Read and parse the config file without validating it. Used when the
    /// caller intends to repair an invalid document (e.g. the raw YAML API).
    pub fn load_raw(&self) -> Result<Config> {
        let path = self.paths.config_file();
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("reading {}: {}", path.display(), e)))?;
        let cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| Error::validation(vec![format!("parsing config: {}", e)]))?;
        Ok(cfg)
    }

    /// Atomically persist `cfg`. The previous file content (if any) is
    /// copied to `config.yml.bak` first; the temp file is removed if the
    /// rename fails.
    pub fn save(&self, cfg: &Config) -> Result<()> {
        let _guard = self.save_lock.lock().expect("config save lock poisoned");

        let path = self.paths.config_file();
        backup(&path)?;

        let data = serde_yaml::to_string(cfg)
            .map_err(|e| Error::internal(format!("marshaling config: {}", e)))?;

        let tmp = sibling(&path, ".tmp");
        fs::write(&tmp, data)
            .map_err(|e| Error::config(format!("writing {}: {}", tmp.display(), e)))?;

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::config(format!("renaming temp config: {}", e)));
        }

        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Create the root/certs/logs directories and a default config file if
    /// none exists yet.
    pub fn init(&self) -> Result<()> {
        for dir in [self.paths.root().to_path_buf(), self.paths.certs_dir(), self.paths.logs_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| Error::config(format!("creating directory {}: {}", dir.display(), e)))?;
        }

        let path = self.paths.config_file();
        if !path.exists() {
            let data = serde_yaml::to_string(&Config::default())
                .map_err(|e| Error::internal(format!("marshaling default config: {}", e)))?;
            fs::write(&path, data)
                .map_err(|e| Error::config(format!("writing {}: {}", path.display(), e)))?;
        }
        Ok(())
    }
}

/// `<path><suffix>`, e.g. `config.yml.bak` next to `config.yml`.
fn sibling(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    std::path::PathBuf::from(name)
}

/// Copy the existing config file to `<path>.bak`. No-op when the source
/// does not exist; a half-written backup is removed.
fn backup(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bak = sibling(path, ".bak");
    if let Err(e) = fs::copy(path, &bak) {
        let _ = fs::remove_file(&bak);
        return Err(Error::config(format!("backing up config: {}", e)));
    }
    Ok(())
}

/// Add or update a project from a per-project descriptor, rejecting any
/// domain already owned by a different project name.
pub fn merge_project(
    cfg: &mut Config,
    name: &str,
    project_path: &str,
    descriptor: ProjectDescriptor,
) -> Result<()> {
    for (existing_name, existing) in &cfg.projects {
        if existing_name == name {
            continue;
        }
        if existing.domain == descriptor.domain {
            return Err(Error::conflict(format!(
                "domain {:?} is already used by project {:?}",
                descriptor.domain, existing_name
            )));
        }
    }

    cfg.projects.insert(
        name.to_string(),
        Project {
            domain: descriptor.domain,
            path: project_path.to_string(),
            enabled: true,
            services: descriptor.services,
        },
    );
    Ok(())
}

/// Remove a project by name; errors when the name is unknown.
pub fn remove_project(cfg: &mut Config, name: &str) -> Result<()> {
    if cfg.projects.remove(name).is_none() {
        return Err(Error::not_found("project", name));
    }
    Ok(())
}

/// Read a per-project `hatch.yml` descriptor.
pub fn load_project_descriptor(path: &Path) -> Result<ProjectDescriptor> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("reading project config: {}", e)))?;
    let descriptor: ProjectDescriptor = serde_yaml::from_str(&data)
        .map_err(|e| Error::config(format!("parsing project config: {}", e)))?;

    if descriptor.domain.is_empty() {
        return Err(Error::config("project config: domain is required"));
    }
    if descriptor.services.is_empty() {
        return Err(Error::config("project config: at least one service is required"));
    }
    Ok(descriptor)
}
