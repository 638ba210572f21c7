//! Interactive shell-style traversal and marking.
//!
//! This mirrors a restore shell's command surface (`cd`, `ls`, `mark`,
//! `unmark`, `find`, `lsmark`, `estimate`) as plain methods returning
//! structured data; a caller (the demo CLI, or a director-facing RPC
//! layer outside this crate's scope) is responsible for rendering it.

use globset::GlobBuilder;
use regex::Regex;

use crate::cancel::CancellationFlag;
use crate::error::{Error, Result};
use crate::node::{NodeIndex, NodeKind};
use crate::tree::BuiltTree;

/// One entry as listed by `ls`/`dir`.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub index: NodeIndex,
    pub name: String,
    pub kind: NodeKind,
    pub extract: bool,
    pub extract_dir: bool,
}

/// A cursor into a [`BuiltTree`], plus the glob/regex case-folding policy
/// for this session.
pub struct Selection<'t> {
    tree: &'t mut BuiltTree,
    current: NodeIndex,
    case_sensitive: bool,
}

impl<'t> Selection<'t> {
    pub fn new(tree: &'t mut BuiltTree, case_sensitive: bool) -> Self {
        let root = tree.root();
        Self {
            tree,
            current: root,
            case_sensitive,
        }
    }

    /// Resume at a previously-saved cursor (used by
    /// [`crate::session::RestoreSession`], which outlives any single
    /// [`Selection`] borrow of its tree).
    pub fn with_cursor(tree: &'t mut BuiltTree, current: NodeIndex, case_sensitive: bool) -> Self {
        Self {
            tree,
            current,
            case_sensitive,
        }
    }

    pub fn current_directory(&self) -> String {
        self.tree.path_to(self.current)
    }

    pub fn current_node(&self) -> NodeIndex {
        self.current
    }

    /// `cd [path]`: `..` goes to parent, empty returns to root.
    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            self.current = self.tree.root();
            return Ok(());
        }
        match self.tree.find(path, self.current, self.case_sensitive) {
            Some(idx) if self.tree.node(idx).is_directory() => {
                self.current = idx;
                Ok(())
            }
            Some(_) => Err(Error::NotFound(format!("{path} is not a directory"))),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    /// `ls [glob]` / `dir`: children of the current node matching `glob`
    /// (or all children, if `glob` is `None`).
    pub fn list(&self, glob: Option<&str>) -> Result<Vec<ListEntry>> {
        let matcher = glob.map(|g| build_glob(g, self.case_sensitive)).transpose()?;
        let mut out = Vec::new();
        for child in self.tree.children(self.current) {
            let name = self.tree.name_str(child);
            if matcher.as_ref().map(|m| m.is_match(name)).unwrap_or(true) {
                let n = self.tree.node(child);
                out.push(ListEntry {
                    index: child,
                    name: name.to_string(),
                    kind: n.kind,
                    extract: n.extract(),
                    extract_dir: n.extract_dir(),
                });
            }
        }
        Ok(out)
    }

    /// `find <pattern>`: paths anywhere under the current node matching
    /// `pattern`.
    pub fn find_paths(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = build_glob(pattern, self.case_sensitive)?;
        let mut out = Vec::new();
        for idx in self.tree.subtree(self.current) {
            if idx == self.current {
                continue;
            }
            if matcher.is_match(self.tree.name_str(idx)) {
                out.push(self.tree.path_to(idx));
            }
        }
        Ok(out)
    }

    /// `lsmark`: every marked node in the whole tree.
    pub fn list_marked(&self) -> Vec<String> {
        self.tree
            .subtree(self.tree.root())
            .filter(|&idx| self.tree.node(idx).marked())
            .map(|idx| self.tree.path_to(idx))
            .collect()
    }

    /// `estimate`: count of marked files and marked directories under the
    /// current node.
    pub fn estimate(&self) -> (usize, usize) {
        let mut files = 0;
        let mut dirs = 0;
        for idx in self.tree.subtree(self.current) {
            let n = self.tree.node(idx);
            if n.kind == NodeKind::File && n.extract() {
                files += 1;
            } else if n.is_directory() && n.extract_dir() {
                dirs += 1;
            }
        }
        (files, dirs)
    }

    /// `mark <glob>` / `mark *` (recursive form). Returns the number of
    /// nodes touched.
    pub fn mark(&mut self, glob: &str, cancel: &CancellationFlag) -> Result<usize> {
        self.mark_or_unmark(glob, true, cancel)
    }

    /// `unmark <glob>`.
    pub fn unmark(&mut self, glob: &str, cancel: &CancellationFlag) -> Result<usize> {
        self.mark_or_unmark(glob, false, cancel)
    }

    /// Regex-based marking: compilation failure is reported back to the
    /// caller as [`Error::InvalidRegex`] rather than aborting the session.
    pub fn mark_regex(&mut self, pattern: &str, mark: bool, cancel: &CancellationFlag) -> Result<usize> {
        let re = Regex::new(pattern).map_err(|e| Error::InvalidRegex(e.to_string()))?;
        let mut touched = 0;
        let matches: Vec<NodeIndex> = self
            .tree
            .subtree(self.current)
            .filter(|&idx| idx != self.current && re.is_match(self.tree.name_str(idx)))
            .collect();
        for idx in matches {
            if cancel.is_set() {
                return Err(Error::Cancelled);
            }
            if mark {
                self.tree.mark_node(idx);
            } else {
                self.tree.unmark_node(idx);
            }
            touched += 1;
        }
        Ok(touched)
    }

    fn mark_or_unmark(&mut self, glob: &str, mark: bool, cancel: &CancellationFlag) -> Result<usize> {
        // `mark *` (exactly) is the fully recursive form: mark/unmark the entire subtree of the
        // current node.
        if glob == "*" {
            if mark {
                self.tree.mark_subtree(self.current, cancel)?;
            } else {
                self.tree.unmark_subtree(self.current, cancel)?;
            }
            return Ok((self.tree.node(self.current).subtree_end.0 - self.current.0) as usize);
        }

        let (dir_glob, file_glob, recursive) = split_path_glob(glob);
        let dirs = self.resolve_directories(dir_glob)?;
        let file_matcher = build_glob(file_glob, self.case_sensitive)?;

        let mut touched = 0;
        for dir in dirs {
            let candidates: Vec<NodeIndex> = if recursive {
                self.tree.subtree(dir).filter(|&i| i != dir).collect()
            } else {
                self.tree.children(dir).collect()
            };
            for idx in candidates {
                if cancel.is_set() {
                    return Err(Error::Cancelled);
                }
                if file_matcher.is_match(self.tree.name_str(idx)) {
                    if mark {
                        self.tree.mark_node(idx);
                    } else {
                        self.tree.unmark_node(idx);
                    }
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    /// Resolve a glob's directory component against the current node,
    /// supporting `?`/`*` per path segment.
    fn resolve_directories(&self, dir_glob: Option<&str>) -> Result<Vec<NodeIndex>> {
        let Some(dir_glob) = dir_glob else {
            return Ok(vec![self.current]);
        };

        let mut current_set = vec![self.current];
        for seg in dir_glob.split('/').filter(|s| !s.is_empty()) {
            if seg == "." {
                continue;
            }
            if seg == ".." {
                current_set = current_set.iter().map(|&c| self.tree.parent(c)).collect();
                continue;
            }
            let matcher = build_glob(seg, self.case_sensitive)?;
            let mut next = Vec::new();
            for &dir in &current_set {
                for child in self.tree.children(dir) {
                    if self.tree.node(child).is_directory()
                        && matcher.is_match(self.tree.name_str(child))
                    {
                        next.push(child);
                    }
                }
            }
            current_set = next;
        }
        Ok(current_set)
    }

    pub fn error_string(&self, err: &Error) -> String {
        match err {
            Error::NotFound(p) => format!("{p}: no such file or directory"),
            Error::InvalidRegex(p) => format!("invalid pattern: {p}"),
            Error::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

/// Split a glob containing a directory separator into its directory and
/// file components. A glob ending in `/**` resolves the
/// directory component and then matches every descendant recursively.
fn split_path_glob(glob: &str) -> (Option<&str>, &str, bool) {
    if let Some(stripped) = glob.strip_suffix("/**") {
        return (Some(stripped), "*", true);
    }
    match glob.rfind('/') {
        Some(pos) => (Some(&glob[..pos]), &glob[pos + 1..], false),
        None => (None, glob, false),
    }
}

fn build_glob(pattern: &str, case_sensitive: bool) -> Result<globset::GlobMatcher> {
    GlobBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| Error::InvalidRegex(e.to_string()))
}
