// The project tree is a forest of files and folders addressed by `/`-joined
// names. Trees are persistent: a mutation copies the nodes on the path from the
// root to the changed node and shares every other node with the previous tree.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::errors::{CodeboxError, CodeboxErrorType, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum PathNode {
    File {
        name: String,
        #[serde(default)]
        content: String,
    },
    Folder {
        name: String,
        #[serde(default)]
        children: Vec<Arc<PathNode>>,
    },
}

impl PathNode {
    pub(crate) fn file(name: impl Into<String>, content: impl Into<String>) -> PathNode {
        PathNode::File {
            name: name.into(),
            content: content.into(),
        }
    }

    pub(crate) fn folder(name: impl Into<String>, children: Vec<PathNode>) -> PathNode {
        PathNode::Folder {
            name: name.into(),
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            PathNode::File { name, .. } => name,
            PathNode::Folder { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct PathTree {
    roots: Vec<Arc<PathNode>>,
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();
    if trimmed.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Err(CodeboxError::not_found(format!("Path `{}` is empty or malformed", path)));
    }
    Ok(parts)
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(CodeboxError::new(
            CodeboxErrorType::InvalidPath,
            format!("`{}` is not a valid name", name),
        ));
    }
    Ok(())
}

/// Every name is valid and unique among its siblings, so each path resolves.
fn validate_level(level: &[Arc<PathNode>], prefix: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for node in level {
        let name = node.name();
        check_name(name)?;
        if !seen.insert(name) {
            return Err(CodeboxError::new(
                CodeboxErrorType::InvalidPath,
                format!("`{}{}` appears more than once", prefix, name),
            ));
        }
        if let PathNode::Folder { children, .. } = node.as_ref() {
            validate_level(children, &format!("{}{}/", prefix, name))?;
        }
    }
    Ok(())
}

fn find<'a>(level: &'a [Arc<PathNode>], path_parts: &[&str]) -> Result<&'a Arc<PathNode>> {
    let part = path_parts[0];
    let child = level.iter().find(|node| node.name() == part);
    let child = match child {
        None => {
            let msg = format!("Child {} does not exist", part);
            tracing::debug!("{}", msg);
            return Err(CodeboxError::not_found(msg));
        }
        Some(c) => c,
    };
    if path_parts.len() == 1 {
        return Ok(child);
    }
    match child.as_ref() {
        PathNode::File { .. } => {
            let msg = format!("Child {} is a file", part);
            tracing::debug!("{}", msg);
            Err(CodeboxError::not_found(msg))
        }
        PathNode::Folder { children, .. } => find(children, &path_parts[1..]),
    }
}

fn replace_content(
    level: &[Arc<PathNode>],
    path_parts: &[&str],
    content: &str,
) -> Result<Vec<Arc<PathNode>>> {
    let part = path_parts[0];
    let index = level
        .iter()
        .position(|node| node.name() == part)
        .ok_or_else(|| CodeboxError::not_found(format!("Child {} does not exist", part)))?;

    let replacement = match (level[index].as_ref(), path_parts.len()) {
        (PathNode::File { name, .. }, 1) => PathNode::File {
            name: name.clone(),
            content: content.to_string(),
        },
        (PathNode::Folder { .. }, 1) => {
            return Err(CodeboxError::not_found(format!("{} is a folder", part)));
        }
        (PathNode::File { .. }, _) => {
            return Err(CodeboxError::not_found(format!("Child {} is a file", part)));
        }
        (PathNode::Folder { name, children }, _) => PathNode::Folder {
            name: name.clone(),
            children: replace_content(children, &path_parts[1..], content)?,
        },
    };

    let mut copy = level.to_vec();
    copy[index] = Arc::new(replacement);
    Ok(copy)
}

fn collect_paths(level: &[Arc<PathNode>], prefix: &str, files_only: bool, out: &mut Vec<String>) {
    for node in level {
        let path = if prefix.is_empty() {
            node.name().to_string()
        } else {
            format!("{}/{}", prefix, node.name())
        };
        match node.as_ref() {
            PathNode::File { .. } => out.push(path),
            PathNode::Folder { children, .. } => {
                if !files_only {
                    out.push(path.clone());
                }
                collect_paths(children, &path, files_only, out);
            }
        }
    }
}

impl PathTree {
    pub(crate) fn new(roots: Vec<PathNode>) -> PathTree {
        PathTree {
            roots: roots.into_iter().map(Arc::new).collect(),
        }
    }

    pub(crate) fn roots(&self) -> &[Arc<PathNode>] {
        &self.roots
    }

    pub(crate) fn from_json(raw: &str) -> Result<PathTree> {
        let tree: PathTree = serde_json::from_str(raw)?;
        validate_level(&tree.roots, "")?;
        Ok(tree)
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[instrument(skip(self))]
    pub(crate) fn resolve(&self, path: &str) -> Result<&PathNode> {
        let parts = split_path(path)?;
        find(&self.roots, &parts).map(|node| node.as_ref()).map_err(|mut err| {
            err.message = format!("Failed to resolve path {}: {}", path, err.message);
            err
        })
    }

    pub(crate) fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub(crate) fn get_content(&self, path: &str) -> Result<&str> {
        match self.resolve(path)? {
            PathNode::File { content, .. } => Ok(content),
            PathNode::Folder { .. } => Err(CodeboxError::not_found(format!(
                "Path {} is a folder",
                path
            ))),
        }
    }

    /// New tree with the file at `path` holding `content`.
    #[instrument(skip(self, content))]
    pub(crate) fn set_content(&self, path: &str, content: &str) -> Result<PathTree> {
        let parts = split_path(path)?;
        let roots = replace_content(&self.roots, &parts, content).map_err(|mut err| {
            err.message = format!("Failed to write path {}: {}", path, err.message);
            err
        })?;
        Ok(PathTree { roots })
    }

    /// New tree with `node` appended after the existing top-level entries.
    #[instrument(skip(self, node), fields(name = %node.name()))]
    pub(crate) fn insert_at_root(&self, node: PathNode) -> Result<PathTree> {
        let name = node.name();
        check_name(name)?;
        if self.roots.iter().any(|existing| existing.name() == name) {
            tracing::info!("Path already exists");
            return Err(CodeboxError::already_exists(format!(
                "Something already exists at {}",
                name
            )));
        }
        let mut roots = self.roots.clone();
        roots.push(Arc::new(node));
        Ok(PathTree { roots })
    }

    /// Every file path, depth first in child order.
    pub(crate) fn file_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(&self.roots, "", true, &mut out);
        out
    }

    pub(crate) fn folder_paths(&self) -> Vec<String> {
        let mut all = Vec::new();
        collect_paths(&self.roots, "", false, &mut all);
        all.into_iter()
            .filter(|path| matches!(self.resolve(path), Ok(PathNode::Folder { .. })))
            .collect()
    }
}
