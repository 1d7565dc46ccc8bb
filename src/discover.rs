// src/discover.rs
//! Locating the input file: either the configured path, or the single
//! recognizable CSV in the search directory.

use glob::{glob_with, MatchOptions, Pattern};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::config::ColumnLayout;
use crate::errors::DiscoveryError;
use crate::schema::{classify, ColumnKind, MetadataField};

/// Whether the header row of `path` names the country column and at least one year.
fn looks_like_data_file(path: &Path, layout: &ColumnLayout) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let Ok(headers) = rdr.headers() else {
        return false;
    };

    let kinds: Vec<ColumnKind> = headers.iter().map(|h| classify(h, layout)).collect();
    kinds.contains(&ColumnKind::Metadata(MetadataField::Country))
        && kinds.iter().any(|k| matches!(k, ColumnKind::Year(_)))
}

/// Resolve the file to process.
///
/// An explicit path must exist and be a file. Without one, every `*.csv` in
/// `search_dir` whose header is recognizable is a candidate; exactly one
/// candidate is required.
#[tracing::instrument(level = "info", skip(layout), fields(dir = %search_dir.display()))]
pub fn locate_input(
    explicit: Option<&Path>,
    search_dir: &Path,
    layout: &ColumnLayout,
) -> Result<PathBuf, DiscoveryError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(DiscoveryError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(DiscoveryError::Unreadable {
                path: path.to_path_buf(),
                reason: "not a regular file".into(),
            });
        }
        info!(path = %path.display(), "using configured input file");
        return Ok(path.to_path_buf());
    }

    if !search_dir.is_dir() {
        return Err(DiscoveryError::NotFound {
            path: search_dir.to_path_buf(),
        });
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    // the directory is matched literally; only the file name is a pattern
    let pattern = format!("{}/*.csv", Pattern::escape(&search_dir.to_string_lossy()));

    let mut candidates = Vec::new();
    for entry in glob_with(&pattern, options)? {
        let path = entry.map_err(|e| DiscoveryError::Unreadable {
            path: e.path().to_path_buf(),
            reason: e.error().to_string(),
        })?;
        if path.is_file() && looks_like_data_file(&path, layout) {
            candidates.push(path);
        } else {
            debug!(path = %path.display(), "skipping unrecognized file");
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Err(DiscoveryError::NoCandidates {
            dir: search_dir.to_path_buf(),
        }),
        1 => {
            let path = candidates.remove(0);
            info!(path = %path.display(), "discovered input file");
            Ok(path)
        }
        _ => Err(DiscoveryError::Ambiguous {
            dir: search_dir.to_path_buf(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const DATA: &str = "Country,Indicator,2000,2001\nKenya,x,1,2\n";

    #[test]
    fn explicit_path_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("energy.csv");
        fs::write(&path, DATA).unwrap();
        fs::write(dir.path().join("other.csv"), DATA).unwrap();

        let found = locate_input(Some(&path), dir.path(), &ColumnLayout::default()).unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn missing_explicit_path_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.csv");
        let err = locate_input(Some(&path), dir.path(), &ColumnLayout::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound { .. }));
    }

    #[test]
    fn explicit_directory_is_unreadable() {
        let dir = tempdir().unwrap();
        let err = locate_input(Some(dir.path()), dir.path(), &ColumnLayout::default())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreadable { .. }));
    }

    #[test]
    fn scan_picks_the_only_recognizable_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.csv"), "Name,Comment\na,b\n").unwrap();
        fs::write(dir.path().join("readme.txt"), DATA).unwrap();
        fs::write(dir.path().join("Energy.CSV"), DATA).unwrap();

        let found = locate_input(None, dir.path(), &ColumnLayout::default()).unwrap();
        assert_eq!(found.file_name().unwrap(), "Energy.CSV");
    }

    #[test]
    fn scan_without_candidates_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.csv"), "Name,Comment\na,b\n").unwrap();
        let err = locate_input(None, dir.path(), &ColumnLayout::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoCandidates { .. }));
    }

    #[test]
    fn scan_with_several_candidates_is_ambiguous() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), DATA).unwrap();
        fs::write(dir.path().join("a.csv"), DATA).unwrap();

        match locate_input(None, dir.path(), &ColumnLayout::default()) {
            Err(DiscoveryError::Ambiguous { candidates, .. }) => {
                let names: Vec<_> = candidates
                    .iter()
                    .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                    .collect();
                assert_eq!(names, vec!["a.csv", "b.csv"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn scan_treats_directory_name_literally() {
        let root = tempdir().unwrap();
        for name in ["data[2024]", "raw*?", "open["] {
            let dir = root.path().join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("energy.csv"), DATA).unwrap();

            let found = locate_input(None, &dir, &ColumnLayout::default())
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_eq!(found, dir.join("energy.csv"));
        }
    }

    #[test]
    fn missing_search_directory_is_not_found() {
        let err = locate_input(
            None,
            Path::new("/nonexistent/data"),
            &ColumnLayout::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound { .. }));
    }
}
