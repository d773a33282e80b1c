//! Three-way tree merge over whole file contents.
//!
//! A path merges cleanly when at most one side changed it relative to the
//! base, or both sides made the identical change. Anything else is a path
//! conflict; there is no line-level merging.

use std::collections::BTreeSet;

use changegate_state::Tree;

/// Merge `ours` and `theirs` against `base`.
///
/// Returns the merged tree, or every conflicting path in sorted order.
pub fn merge_trees(base: &Tree, ours: &Tree, theirs: &Tree) -> Result<Tree, Vec<String>> {
    let paths: BTreeSet<&str> = base
        .paths()
        .chain(ours.paths())
        .chain(theirs.paths())
        .collect();

    let mut merged = Tree::new();
    let mut conflicts = Vec::new();
    for path in paths {
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);
        let resolved = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            conflicts.push(path.to_string());
            continue;
        };
        if let Some(content) = resolved {
            merged.insert(path, content);
        }
    }

    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_edits_merge() {
        let base = Tree::new().with("a.txt", "1");
        let ours = base.clone().with("b.txt", "b");
        let theirs = base.clone().with("c.txt", "c");
        let merged = merge_trees(&base, &ours, &theirs).unwrap();
        assert_eq!(merged, Tree::new().with("a.txt", "1").with("b.txt", "b").with("c.txt", "c"));
    }

    #[test]
    fn one_sided_change_wins() {
        let base = Tree::new().with("a.txt", "1");
        let ours = Tree::new().with("a.txt", "2");
        let merged = merge_trees(&base, &ours, &base).unwrap();
        assert_eq!(merged.get("a.txt"), Some("2"));
        let merged = merge_trees(&base, &base, &ours).unwrap();
        assert_eq!(merged.get("a.txt"), Some("2"));
    }

    #[test]
    fn deletion_against_untouched_path() {
        let base = Tree::new().with("a.txt", "1").with("b.txt", "b");
        let ours = Tree::new().with("b.txt", "b");
        let merged = merge_trees(&base, &ours, &base).unwrap();
        assert_eq!(merged.get("a.txt"), None);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn identical_additions_do_not_conflict() {
        let base = Tree::new();
        let side = Tree::new().with("a.txt", "same");
        assert_eq!(merge_trees(&base, &side, &side).unwrap(), side);
    }

    #[test]
    fn divergent_edits_conflict() {
        let base = Tree::new();
        let ours = Tree::new().with("a.txt", "2\n2").with("z.txt", "z");
        let theirs = Tree::new().with("a.txt", "1").with("z.txt", "y");
        assert_eq!(
            merge_trees(&base, &ours, &theirs).unwrap_err(),
            vec!["a.txt".to_string(), "z.txt".to_string()]
        );
    }

    #[test]
    fn modify_delete_conflicts() {
        let base = Tree::new().with("a.txt", "1");
        let ours = Tree::new().with("a.txt", "2");
        let theirs = Tree::new();
        assert_eq!(merge_trees(&base, &ours, &theirs).unwrap_err(), vec!["a.txt".to_string()]);
    }
}
