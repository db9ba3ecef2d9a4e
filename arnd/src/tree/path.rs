/*
 * This file is a part of Arn
 */

//! Path parsing and canonicalization (data model §3.1).
//!
//! Canonical form is always absolute and starts with `/`. The `//` shorthand
//! expands to `/@/`, marking the replicated global subtree; every other
//! absolute path (including `/Local/...`) is local-only and never crosses a
//! sync session.

use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(String);

impl Path {
    pub fn root() -> Self {
        Path("/".to_string())
    }

    /// Parse user-facing path syntax into canonical form.
    pub fn parse(input: &str) -> ArnResult<Self> {
        if input.is_empty() {
            return Err(ArnError::new(
                ErrorKind::CreateError,
                Subsystem::Tree,
                "empty path",
            ));
        }
        let canonical = if let Some(rest) = input.strip_prefix("//") {
            if rest.is_empty() {
                "/@".to_string()
            } else {
                format!("/@/{rest}")
            }
        } else if let Some(stripped) = input.strip_prefix('/') {
            if stripped.is_empty() {
                "/".to_string()
            } else {
                format!("/{stripped}")
            }
        } else {
            return Err(ArnError::new(
                ErrorKind::CreateError,
                Subsystem::Tree,
                format!("path must be absolute: {input}"),
            ));
        };
        if canonical.contains("//") {
            return Err(ArnError::new(
                ErrorKind::CreateError,
                Subsystem::Tree,
                format!("malformed path: {input}"),
            ));
        }
        Ok(Path(canonical))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn is_global(&self) -> bool {
        self.0 == "/@" || self.0.starts_with("/@/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let mut segs: Vec<&str> = self.segments().collect();
        segs.pop();
        if segs.is_empty() {
            Some(Path::root())
        } else {
            Some(Path(format!("/{}", segs.join("/"))))
        }
    }

    /// The last segment, including a trailing `!` if present.
    pub fn leaf_name(&self) -> &str {
        self.segments().next_back().unwrap_or("")
    }

    pub fn is_provider(&self) -> bool {
        self.leaf_name().ends_with('!')
    }

    pub fn bare_name(&self) -> &str {
        self.leaf_name().trim_end_matches('!')
    }

    /// Path of this link's twin: the same path with the leaf's trailing `!`
    /// marker toggled. `None` for the root, which has no twin.
    pub fn twin_path(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let parent = self.parent()?;
        let leaf = self.leaf_name();
        let twin_leaf = if let Some(bare) = leaf.strip_suffix('!') {
            bare.to_string()
        } else {
            format!("{leaf}!")
        };
        Some(parent.child(&twin_leaf))
    }

    pub fn child(&self, name: &str) -> Path {
        if self.is_root() {
            Path(format!("/{name}"))
        } else {
            Path(format!("{}/{name}", self.0))
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_slash_expands_to_at() {
        let p = Path::parse("//House/Kitchen/Lamp").unwrap();
        assert_eq!(p.as_str(), "/@/House/Kitchen/Lamp");
        assert!(p.is_global());
    }

    #[test]
    fn local_paths_are_not_global() {
        let p = Path::parse("/Local/scratch").unwrap();
        assert!(!p.is_global());
    }

    #[test]
    fn relative_path_rejected() {
        assert!(Path::parse("House/Kitchen").is_err());
    }

    #[test]
    fn twin_path_toggles_bang() {
        let p = Path::parse("//Pipes/p!").unwrap();
        assert_eq!(p.leaf_name(), "p!");
        assert_eq!(p.bare_name(), "p");
        assert!(p.is_provider());
        let twin = p.twin_path().unwrap();
        assert_eq!(twin.as_str(), "/@/Pipes/p");
        assert_eq!(twin.twin_path().unwrap(), p);
    }

    #[test]
    fn parent_of_top_level_is_root() {
        let p = Path::parse("//X").unwrap();
        assert_eq!(p.parent().unwrap(), Path::root());
    }
}
