//! Directory-structure view built from a walk.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::format::format_size;
use crate::walk::FileEntry;

/// Node kind in a [`TreeNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One file or directory in the explored tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Repository-relative path.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Totals over an explored tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub total_files: usize,
    pub total_directories: usize,
    pub total_size: u64,
    /// Deepest level reached below the starting directory.
    pub max_depth: usize,
    /// Extension → file count.
    pub file_types: BTreeMap<String, usize>,
}

#[derive(Default)]
struct DirBuilder {
    dirs: BTreeMap<String, DirBuilder>,
    files: Vec<FileEntry>,
}

impl DirBuilder {
    fn dir_mut(&mut self, segments: &[&str]) -> &mut DirBuilder {
        let mut node = self;
        for segment in segments {
            node = node.dirs.entry((*segment).to_string()).or_default();
        }
        node
    }

    fn into_nodes(self, prefix: &str) -> Vec<TreeNode> {
        let mut nodes = Vec::with_capacity(self.dirs.len() + self.files.len());
        for (name, dir) in self.dirs {
            let path = join(prefix, &name);
            let children = dir.into_nodes(&path);
            nodes.push(TreeNode {
                name,
                path,
                kind: NodeKind::Directory,
                size: None,
                children,
            });
        }
        let mut files = self.files;
        files.sort_by(|a, b| a.name().cmp(b.name()));
        for file in files {
            nodes.push(TreeNode {
                name: file.name().to_string(),
                path: file.path.clone(),
                kind: NodeKind::File,
                size: file.size,
                children: Vec::new(),
            });
        }
        nodes
    }
}

/// Builds the children of `root` from walked files and seen directories.
///
/// Directories come first, then files, each group sorted by name.
#[must_use]
pub fn build_tree(root: &str, files: &[FileEntry], directories: &[String]) -> (Vec<TreeNode>, TreeStats) {
    let mut top = DirBuilder::default();
    let mut stats = TreeStats::default();
    let mut seen_dirs = BTreeSet::new();

    for dir in directories {
        let Some(relative) = relative_to(root, dir) else {
            continue;
        };
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        for depth in 1..=segments.len() {
            seen_dirs.insert(segments[..depth].join("/"));
        }
        stats.max_depth = stats.max_depth.max(segments.len() - 1);
        top.dir_mut(&segments);
    }

    for file in files {
        let Some(relative) = relative_to(root, &file.path) else {
            continue;
        };
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some((_, parents)) = segments.split_last() else {
            continue;
        };
        for depth in 1..=parents.len() {
            seen_dirs.insert(parents[..depth].join("/"));
        }
        stats.total_files += 1;
        stats.total_size += file.size.unwrap_or(0);
        stats.max_depth = stats.max_depth.max(parents.len());
        *stats.file_types.entry(file.extension()).or_insert(0) += 1;
        top.dir_mut(parents).files.push(file.clone());
    }

    stats.total_directories = seen_dirs.len();
    (top.into_nodes(root), stats)
}

/// ASCII rendering: `├── ` / `└── ` branches, `│   ` continuation.
#[must_use]
pub fn render_tree(nodes: &[TreeNode]) -> String {
    let mut out = String::new();
    render_level(nodes, "", &mut out);
    out
}

fn render_level(nodes: &[TreeNode], indent: &str, out: &mut String) {
    for (index, node) in nodes.iter().enumerate() {
        let last = index + 1 == nodes.len();
        let branch = if last { "└── " } else { "├── " };
        out.push_str(indent);
        out.push_str(branch);
        match node.kind {
            NodeKind::File => {
                out.push_str(&node.name);
                out.push_str(" (");
                out.push_str(&format_size(node.size.unwrap_or(0)));
                out.push_str(")\n");
            }
            NodeKind::Directory => {
                out.push_str(&node.name);
                out.push_str("/\n");
                let next = format!("{indent}{}", if last { "    " } else { "│   " });
                render_level(&node.children, &next, out);
            }
        }
    }
}

fn relative_to<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    if root.is_empty() {
        return Some(path);
    }
    path.strip_prefix(root)?.strip_prefix('/')
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
