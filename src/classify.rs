//! Interpretation of decoded cover terms.
//!
//! Structure of an export file after decoding:
//!
//!   {file, Module, BeamFile}
//!   {Module, [{Module, Function, Arity, Clause, LinesCnt}]}
//!   {{bump, Module, Function, Arity, Clause, Line}, HitCnt}
//!
//! Only the first and last shapes are used; everything else is skipped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::model::CoverageElement;
use crate::term::Term;
use crate::tree::CoverageTree;

/// Extension of Erlang source files.
pub const SOURCE_EXTENSION: &str = "erl";

/// Directory holding sources, next to the `ebin/` (or `.eunit/`) output
/// directory.
pub const SOURCE_DIR: &str = "src";

/// Module name used for bumps that arrive before any module declaration
/// when [`OrphanPolicy::Placeholder`] is in effect.
pub const UNKNOWN_MODULE: &str = "<unknown>";

/// A cover record relevant to coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `{file, Module, BeamFile}`
    Module { name: String, beam_path: String },
    /// `{{bump, Module, Function, Arity, Clause, Line}, Hits}`
    Bump {
        module: String,
        function: String,
        arity: u32,
        clause: u32,
        line: u32,
        hits: u64,
    },
}

impl Record {
    /// True for bumps of compiler-generated code, which has no source line.
    pub fn is_generated(&self) -> bool {
        matches!(self, Record::Bump { line: 0, .. })
    }
}

/// Recognize a record, or `None` for any other shape.
pub fn classify(term: &Term) -> Option<Record> {
    let elements = term.as_tuple()?;
    match elements {
        [tag, module, path] if tag.is_atom("file") => Some(Record::Module {
            name: module.as_atom()?.to_string(),
            beam_path: path.as_string()?,
        }),
        [key, hits] => {
            let key = key.as_tuple()?;
            let [tag, module, function, arity, clause, line] = key else {
                return None;
            };
            if !tag.is_atom("bump") {
                return None;
            }
            Some(Record::Bump {
                module: module.as_atom()?.to_string(),
                function: function.as_atom()?.to_string(),
                arity: int(arity)?,
                clause: int(clause)?,
                line: int(line)?,
                hits: int(hits)?,
            })
        }
        _ => None,
    }
}

fn int<T: TryFrom<i64>>(term: &Term) -> Option<T> {
    term.as_integer().and_then(|i| T::try_from(i).ok())
}

/// Guess the source directory of a module from its beam path by replacing
/// `ebin/<file>.beam` with `src`.
pub fn source_root(beam_path: &str) -> Option<PathBuf> {
    let root = Path::new(beam_path).parent()?.parent()?;
    if root.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(SOURCE_DIR))
}

/// What to do with a bump that arrives before any `file` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Refuse the file with a missing-module-context error.
    #[default]
    Reject,
    /// Attach the bump to the synthetic [`UNKNOWN_MODULE`] module.
    Placeholder,
}

/// Index of the first bump that has no module context, if any.
pub fn find_orphan(records: &[Record]) -> Option<usize> {
    for (i, record) in records.iter().enumerate() {
        match record {
            Record::Module { .. } => return None,
            Record::Bump { .. } if !record.is_generated() => return Some(i),
            Record::Bump { .. } => {}
        }
    }
    None
}

/// A bump was seen before any module declaration under
/// [`OrphanPolicy::Reject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanBump;

/// Folds records of one file into a tree, tracking the most recently
/// declared module.
#[derive(Debug, Default)]
pub struct RecordClassifier {
    policy: OrphanPolicy,
    current_module: Option<String>,
}

impl RecordClassifier {
    pub fn new(policy: OrphanPolicy) -> Self {
        Self {
            policy,
            current_module: None,
        }
    }

    pub fn current_module(&self) -> Option<&str> {
        self.current_module.as_deref()
    }

    /// Apply one record. Source directories guessed from module
    /// declarations are added to `source_paths`.
    ///
    /// A bump is always attached to the most recently declared module, even
    /// when its own module field names another one.
    pub fn apply(
        &mut self,
        tree: &mut CoverageTree,
        record: &Record,
        source_paths: &mut BTreeSet<PathBuf>,
    ) -> Result<(), OrphanBump> {
        match record {
            Record::Module { name, beam_path } => {
                if let Some(root) = source_root(beam_path) {
                    source_paths.insert(root);
                }
                let root = tree.root_id();
                if let Ok(id) = tree.create_child(root, CoverageElement::Module, name) {
                    tree.set_relative_source_path(id, format!("{name}.{SOURCE_EXTENSION}"));
                }
                self.current_module = Some(name.clone());
                Ok(())
            }
            Record::Bump { .. } if record.is_generated() => Ok(()),
            Record::Bump {
                module,
                function,
                arity,
                line,
                hits,
                ..
            } => {
                let target = match (&self.current_module, self.policy) {
                    (Some(current), _) => current.as_str(),
                    (None, OrphanPolicy::Placeholder) => UNKNOWN_MODULE,
                    (None, OrphanPolicy::Reject) => return Err(OrphanBump),
                };
                if target != module.as_str() {
                    trace!(declared = %target, named = %module, "bump attached to declared module");
                }
                tree.bump(target, &format!("{function}/{arity}"), *line, *hits);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CoverageMetric, Ratio};

    fn atom(s: &str) -> Term {
        Term::Atom(s.to_string())
    }

    fn file_term(module: &str, path: &str) -> Term {
        Term::Tuple(vec![atom("file"), atom(module), Term::String(path.to_string())])
    }

    fn bump_term(module: &str, function: &str, arity: i64, line: i64, hits: i64) -> Term {
        Term::Tuple(vec![
            Term::Tuple(vec![
                atom("bump"),
                atom(module),
                atom(function),
                Term::Integer(arity),
                Term::Integer(1),
                Term::Integer(line),
            ]),
            Term::Integer(hits),
        ])
    }

    #[test]
    fn test_classify_file_record() {
        let record = classify(&file_term("sip_ua", "/p/apps/sip/ebin/sip_ua.beam")).unwrap();
        assert_eq!(
            record,
            Record::Module {
                name: "sip_ua".into(),
                beam_path: "/p/apps/sip/ebin/sip_ua.beam".into()
            }
        );
    }

    #[test]
    fn test_classify_bump_record() {
        let record = classify(&bump_term("m", "f", 2, 14, 3)).unwrap();
        assert_eq!(
            record,
            Record::Bump {
                module: "m".into(),
                function: "f".into(),
                arity: 2,
                clause: 1,
                line: 14,
                hits: 3
            }
        );
    }

    #[test]
    fn test_other_shapes_are_ignored() {
        let clauses = Term::Tuple(vec![
            atom("m"),
            Term::List(vec![Term::Tuple(vec![
                atom("m"),
                atom("f"),
                Term::Integer(0),
                Term::Integer(1),
                Term::Integer(4),
            ])]),
        ]);
        assert_eq!(classify(&clauses), None);
        assert_eq!(classify(&atom("file")), None);
        assert_eq!(classify(&Term::Tuple(vec![atom("other"), atom("m"), atom("x")])), None);
        assert_eq!(classify(&bump_term("m", "f", 0, -1, 0)), None);
    }

    #[test]
    fn test_source_root() {
        assert_eq!(
            source_root("/p/apps/sip/ebin/sip_ua.beam"),
            Some(PathBuf::from("/p/apps/sip/src"))
        );
        assert_eq!(source_root("app/.eunit/m.beam"), Some(PathBuf::from("app/src")));
        assert_eq!(source_root("ebin/m.beam"), None);
        assert_eq!(source_root("m.beam"), None);
    }

    #[test]
    fn test_bump_attaches_to_last_declared_module() {
        let mut tree = CoverageTree::default();
        let mut paths = BTreeSet::new();
        let mut classifier = RecordClassifier::default();
        for term in [
            file_term("a", "/x/ebin/a.beam"),
            file_term("b", "/x/ebin/b.beam"),
            bump_term("a", "f", 1, 3, 1),
        ] {
            let record = classify(&term).unwrap();
            classifier.apply(&mut tree, &record, &mut paths).unwrap();
        }

        assert!(tree.module("a").unwrap().child("f/1").is_none());
        let f = tree.module("b").unwrap().child("f/1").unwrap();
        assert_eq!(f.relative_source_path(), Some("b.erl"));
        assert_eq!(paths.len(), 1);
        assert_eq!(classifier.current_module(), Some("b"));
    }

    #[test]
    fn test_generated_code_is_ignored() {
        let mut tree = CoverageTree::default();
        let mut paths = BTreeSet::new();
        let mut classifier = RecordClassifier::default();
        classifier
            .apply(&mut tree, &classify(&file_term("m", "/x/ebin/m.beam")).unwrap(), &mut paths)
            .unwrap();
        classifier
            .apply(&mut tree, &classify(&bump_term("m", "f", 0, 0, 9)).unwrap(), &mut paths)
            .unwrap();
        let module = tree.module("m").unwrap();
        assert_eq!(module.child_count(), 0);
        assert_eq!(module.relative_source_path(), Some("m.erl"));
        assert_eq!(tree.root().coverage(CoverageMetric::Line), None);
        assert_eq!(Ratio::new(0, 0).percentage(), 100);
    }

    #[test]
    fn test_orphan_policies() {
        let bump = classify(&bump_term("m", "f", 0, 5, 1)).unwrap();
        let mut tree = CoverageTree::default();
        let mut paths = BTreeSet::new();

        let mut strict = RecordClassifier::new(OrphanPolicy::Reject);
        assert_eq!(strict.apply(&mut tree, &bump, &mut paths), Err(OrphanBump));
        assert!(tree.is_empty());

        let mut lenient = RecordClassifier::new(OrphanPolicy::Placeholder);
        lenient.apply(&mut tree, &bump, &mut paths).unwrap();
        assert!(tree.module(UNKNOWN_MODULE).unwrap().child("f/0").is_some());
    }

    #[test]
    fn test_find_orphan() {
        let module = classify(&file_term("m", "/x/ebin/m.beam")).unwrap();
        let generated = classify(&bump_term("m", "f", 0, 0, 1)).unwrap();
        let bump = classify(&bump_term("m", "f", 0, 5, 1)).unwrap();

        assert_eq!(find_orphan(&[module.clone(), bump.clone()]), None);
        assert_eq!(find_orphan(&[generated.clone(), module]), None);
        assert_eq!(find_orphan(&[generated, bump]), Some(1));
    }
}
