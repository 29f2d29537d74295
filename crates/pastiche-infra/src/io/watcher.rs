// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Change notifications for model files.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Watches model files and reports the ones that changed.
///
/// The parent directory of each file is watched rather than the file itself,
/// so editors that save by replacing the file are still noticed.
pub struct ModelWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<PathBuf>,
    files: HashSet<PathBuf>,
    /// Watched directories and how many files they hold.
    directories: HashMap<PathBuf, usize>,
}

impl ModelWatcher {
    /// Starts the platform watcher.
    pub fn new() -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |result| forward(&sender, result))
            .context("Failed to start the model file watcher")?;
        Ok(Self {
            watcher,
            receiver,
            files: HashSet::new(),
            directories: HashMap::new(),
        })
    }

    /// Starts reporting changes to `path`. The file must exist.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        let file = path
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", path.display()))?;
        if self.files.contains(&file) {
            return Ok(());
        }
        let directory = file
            .parent()
            .with_context(|| format!("{} has no parent directory", file.display()))?
            .to_path_buf();

        if !self.directories.contains_key(&directory) {
            self.watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", directory.display()))?;
        }
        *self.directories.entry(directory).or_default() += 1;
        log::debug!("Watching model file {}", file.display());
        self.files.insert(file);
        Ok(())
    }

    /// Stops reporting changes to `path`.
    pub fn unwatch(&mut self, path: &Path) {
        let file = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.files.remove(&file) {
            return;
        }
        let Some(directory) = file.parent().map(Path::to_path_buf) else {
            return;
        };
        if let Some(count) = self.directories.get_mut(&directory) {
            *count -= 1;
            if *count == 0 {
                self.directories.remove(&directory);
                if let Err(e) = self.watcher.unwatch(&directory) {
                    log::warn!("Failed to stop watching {}: {e}", directory.display());
                }
            }
        }
    }

    /// Whether `path` is being watched.
    pub fn is_watching(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|file| self.files.contains(&file))
            .unwrap_or(false)
    }

    /// Watched files that changed since the last call, each reported once.
    pub fn poll_changes(&self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for path in self.receiver.try_iter() {
            let path = path.canonicalize().unwrap_or(path);
            if self.files.contains(&path) && !changed.contains(&path) {
                changed.push(path);
            }
        }
        changed
    }
}

impl std::fmt::Debug for ModelWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelWatcher")
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

fn forward(sender: &Sender<PathBuf>, result: notify::Result<Event>) {
    match result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for path in event.paths {
                    // The receiver only goes away with the watcher itself.
                    let _ = sender.send(path);
                }
            }
        }
        Err(e) => log::warn!("Model file watcher error: {e}"),
    }
}
