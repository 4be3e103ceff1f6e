// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::{error, info};
use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

/// A pid file holding the current process id, removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)
                .with_context(|| format!("cannot create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .mode(0o644)
            .truncate(true)
            .create(true)
            .open(path)
            .with_context(|| format!("cannot create pid file {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("cannot write pid file {}", path.display()))?;
        info!("created pid file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("removed pid file {}", self.path.display()),
            Err(e) => error!("cannot remove pid file {}: {e}", self.path.display()),
        }
    }
}
