use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Recorded {
    Write(Vec<u8>),
    Delete,
}

/// Virtual file tree over the workspace: reads fall through to disk,
/// writes and deletes are recorded in order and only reach disk through
/// `flush_changes`. One tree lives per migration.
pub struct FsTree {
    root: PathBuf,
    recorded: IndexMap<String, Recorded>,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recorded: IndexMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = normalize_tree_path(path);
        match self.recorded.get(&path) {
            Some(Recorded::Write(_)) => true,
            Some(Recorded::Delete) => false,
            None => self.root.join(&path).exists(),
        }
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_tree_path(path);
        match self.recorded.get(&path) {
            Some(Recorded::Write(content)) => Ok(content.clone()),
            Some(Recorded::Delete) => Err(anyhow!("file was deleted in this tree: {path}")),
            None => fs::read(self.root.join(&path))
                .with_context(|| format!("failed to read {path} from the workspace")),
        }
    }

    pub fn read_string(&self, path: &str) -> Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|_| anyhow!("file is not valid UTF-8: {path}"))
    }

    pub fn write(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        let path = normalize_tree_path(path);
        let content = content.into();
        // writing identical content is not a change
        if self.recorded.get(&path).is_none() {
            if let Ok(on_disk) = fs::read(self.root.join(&path)) {
                if on_disk == content {
                    return;
                }
            }
        }
        self.recorded.insert(path, Recorded::Write(content));
    }

    pub fn delete(&mut self, path: &str) {
        let path = normalize_tree_path(path);
        let known = matches!(self.recorded.get(&path), Some(Recorded::Write(_)))
            || self.root.join(&path).exists();
        if known {
            self.recorded.insert(path, Recorded::Delete);
        }
    }

    pub fn list_changes(&self) -> Vec<FileChange> {
        self.recorded
            .iter()
            .map(|(path, recorded)| match recorded {
                Recorded::Write(content) => FileChange {
                    path: path.clone(),
                    kind: if self.root.join(path).exists() {
                        ChangeKind::Update
                    } else {
                        ChangeKind::Create
                    },
                    content: Some(content.clone()),
                },
                Recorded::Delete => FileChange {
                    path: path.clone(),
                    kind: ChangeKind::Delete,
                    content: None,
                },
            })
            .collect()
    }
}

pub fn flush_changes(root: &Path, changes: &[FileChange]) -> Result<()> {
    for change in changes {
        let target = root.join(&change.path);
        match change.kind {
            ChangeKind::Create | ChangeKind::Update => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let content = change.content.as_deref().unwrap_or_default();
                fs::write(&target, content)
                    .with_context(|| format!("failed to write {}", target.display()))?;
            }
            ChangeKind::Delete => {
                fs::remove_file(&target)
                    .with_context(|| format!("failed to delete {}", target.display()))?;
            }
        }
    }
    Ok(())
}

fn normalize_tree_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}
