//! Rebuilds the folder hierarchy of an archive from its flat entry list.

use tracing::warn;

use super::ExtractedFile;
use crate::common::normalize_path;

/// Payload of a tree node: a directory's children or a file's entry.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Directory(Vec<FileTreeNode>),
    File(ExtractedFile),
}

#[derive(Debug, Clone)]
pub struct FileTreeNode {
    pub name: String,
    /// Full logical path from the archive root.
    pub path: String,
    pub kind: NodeKind,
}

impl FileTreeNode {
    fn directory(name: &str, path: String) -> Self {
        Self { name: name.to_string(), path, kind: NodeKind::Directory(Vec::new()) }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn children(&self) -> &[FileTreeNode] {
        match &self.kind {
            NodeKind::Directory(children) => children,
            NodeKind::File(_) => &[],
        }
    }

    pub fn file(&self) -> Option<&ExtractedFile> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            NodeKind::Directory(_) => None,
        }
    }
}

/// Nested view of an archive. Children keep insertion order.
///
/// Inserting is idempotent: a name that already exists under a parent reuses
/// the existing node, and a file inserted twice keeps the last entry.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    roots: Vec<FileTreeNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> &[FileTreeNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Ensure a directory (and all its ancestors) exists.
    pub fn insert_directory(&mut self, path: &str) {
        let path = normalize_path(path);
        if path.is_empty() {
            return;
        }
        let segments: Vec<&str> = path.split('/').collect();
        ensure_dirs(&mut self.roots, &segments, "");
    }

    /// Insert a file under its path, synthesizing missing ancestors.
    pub fn insert_file(&mut self, file: ExtractedFile) {
        let path = normalize_path(&file.path);
        let Some((parent, name)) = split_parent(&path) else {
            return;
        };

        let siblings = if parent.is_empty() {
            &mut self.roots
        } else {
            let segments: Vec<&str> = parent.split('/').collect();
            ensure_dirs(&mut self.roots, &segments, "")
        };

        match siblings.iter_mut().find(|n| n.name == name) {
            Some(existing) if existing.is_directory() => {
                warn!(path = %path, "file collides with a directory of the same name, keeping the directory");
            }
            Some(existing) => existing.kind = NodeKind::File(file),
            None => siblings.push(FileTreeNode { name: name.to_string(), path: path.clone(), kind: NodeKind::File(file) }),
        }
    }

    /// Look up a node by logical path.
    pub fn find(&self, path: &str) -> Option<&FileTreeNode> {
        let path = normalize_path(path);
        let mut level = &self.roots;
        let mut found = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = level.iter().find(|n| n.name == segment)?;
            level = match &node.kind {
                NodeKind::Directory(children) => children,
                NodeKind::File(_) => &EMPTY,
            };
            found = Some(node);
        }
        found
    }

    /// Depth-first, pre-order walk paired with each node's depth.
    pub fn walk(&self) -> Vec<(usize, &FileTreeNode)> {
        fn visit<'a>(nodes: &'a [FileTreeNode], depth: usize, out: &mut Vec<(usize, &'a FileTreeNode)>) {
            for node in nodes {
                out.push((depth, node));
                visit(node.children(), depth + 1, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.roots, 0, &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        self.walk().iter().filter(|(_, n)| !n.is_directory()).count()
    }
}

static EMPTY: Vec<FileTreeNode> = Vec::new();

fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    })
}

/// Walk `segments` from `level`, creating directories as needed, and return
/// the children of the last one.
fn ensure_dirs<'a>(level: &'a mut Vec<FileTreeNode>, segments: &[&str], prefix: &str) -> &'a mut Vec<FileTreeNode> {
    let Some((first, rest)) = segments.split_first() else {
        return level;
    };
    let path = if prefix.is_empty() { first.to_string() } else { format!("{}/{}", prefix, first) };

    let index = match level.iter().position(|n| n.name == *first) {
        Some(i) => {
            if !level[i].is_directory() {
                warn!(path = %path, "directory replaces a file of the same name");
                level[i] = FileTreeNode::directory(first, path.clone());
            }
            i
        }
        None => {
            level.push(FileTreeNode::directory(first, path.clone()));
            level.len() - 1
        }
    };

    match &mut level[index].kind {
        NodeKind::Directory(children) => ensure_dirs(children, rest, &path),
        // Replaced above.
        NodeKind::File(_) => unreachable!("directory node expected"),
    }
}
