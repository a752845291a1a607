use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classify::{classify, find_orphan, OrphanPolicy, Record, RecordClassifier};
use crate::decoder::TermReader;
use crate::error::{CoverError, Result, TermError};
use crate::tree::CoverageTree;

/// How a set of cover files is folded into one tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub orphan_policy: OrphanPolicy,
    /// Stop at the first file that fails instead of skipping it.
    pub fail_fast: bool,
}

/// A file whose contribution was dropped.
#[derive(Debug)]
pub struct IngestFailure {
    pub file: String,
    pub error: CoverError,
}

/// The outcome of folding one or more cover files.
#[derive(Debug)]
pub struct Ingestion {
    pub tree: CoverageTree,
    /// Source directories guessed from module beam paths.
    pub source_paths: BTreeSet<PathBuf>,
    /// Number of files that contributed to the tree.
    pub files: usize,
    pub failures: Vec<IngestFailure>,
}

impl Ingestion {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decode every coverage record of one cover stream. Fails as a whole on the
/// first malformed term.
pub fn decode_records<R: Read>(input: R) -> std::result::Result<Vec<Record>, TermError> {
    let mut records = Vec::new();
    for term in TermReader::new(input) {
        if let Some(record) = classify(&term?) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Accumulates cover files into a single tree.
#[derive(Debug)]
pub struct Ingestor {
    tree: CoverageTree,
    source_paths: BTreeSet<PathBuf>,
    options: IngestOptions,
    files: usize,
    failures: Vec<IngestFailure>,
}

impl Ingestor {
    pub fn new(options: IngestOptions) -> Self {
        Self::with_tree(CoverageTree::default(), options)
    }

    /// Continue folding into an existing tree.
    pub fn with_tree(tree: CoverageTree, options: IngestOptions) -> Self {
        Self {
            tree,
            source_paths: BTreeSet::new(),
            options,
            files: 0,
            failures: Vec::new(),
        }
    }

    pub fn tree(&self) -> &CoverageTree {
        &self.tree
    }

    pub fn source_paths(&self) -> &BTreeSet<PathBuf> {
        &self.source_paths
    }

    pub fn failures(&self) -> &[IngestFailure] {
        &self.failures
    }

    /// Fold one cover stream identified by `file`. Either every record of the
    /// stream is applied or none is. Returns the number of records applied.
    pub fn fold_reader<R: Read>(&mut self, file: &str, input: R) -> Result<usize> {
        let records = decode_records(input).map_err(|e| CoverError::decode(file, e))?;

        if self.options.orphan_policy == OrphanPolicy::Reject && find_orphan(&records).is_some() {
            return Err(CoverError::MissingModuleContext {
                file: file.to_string(),
            });
        }

        let mut classifier = RecordClassifier::new(self.options.orphan_policy);
        for record in &records {
            classifier
                .apply(&mut self.tree, record, &mut self.source_paths)
                .map_err(|_| CoverError::MissingModuleContext {
                    file: file.to_string(),
                })?;
        }
        self.files += 1;
        debug!(file, records = records.len(), "folded cover data");
        Ok(records.len())
    }

    /// Fold the cover file at `path`.
    pub fn fold_file(&mut self, path: &Path) -> Result<usize> {
        if path.as_os_str().is_empty() {
            return Err(CoverError::Precondition("empty cover file path".to_string()));
        }
        if path.is_dir() {
            return Err(CoverError::Precondition(format!(
                "{} is a directory, not a cover file",
                path.display()
            )));
        }
        let input = BufReader::new(File::open(path)?);
        self.fold_reader(&path.display().to_string(), input)
    }

    /// Fold every file in order. A failing file is logged and skipped unless
    /// `fail_fast` is set; files folded before it stay in the tree either way.
    /// Precondition violations are always returned.
    pub fn fold_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            let path = path.as_ref();
            match self.fold_file(path) {
                Ok(_) => {}
                Err(e @ CoverError::Precondition(_)) => return Err(e),
                Err(e) if self.options.fail_fast => return Err(e),
                Err(error) => {
                    warn!(file = %path.display(), %error, "skipping cover data file");
                    self.failures.push(IngestFailure {
                        file: path.display().to_string(),
                        error,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Ingestion {
        Ingestion {
            tree: self.tree,
            source_paths: self.source_paths,
            files: self.files,
            failures: self.failures,
        }
    }
}

/// Fold `paths` into a fresh tree.
///
/// On a precondition violation only the error is returned. Use an
/// [`Ingestor`] directly to keep the tree folded before the failing path.
pub fn ingest_files<P: AsRef<Path>>(paths: &[P], options: IngestOptions) -> Result<Ingestion> {
    let mut ingestor = Ingestor::new(options);
    ingestor.fold_files(paths)?;
    Ok(ingestor.finish())
}
