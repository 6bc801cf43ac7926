use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ParseError;
use super::types::ParsedRun;
use crate::staging::ContentId;

pub fn silver_file_name(case: &str, id: &ContentId) -> String {
    format!("{case}_{id}.json")
}

pub fn write_silver(dir: &Path, run: &ParsedRun) -> Result<PathBuf, ParseError> {
    fs::create_dir_all(dir).map_err(|source| ParseError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(silver_file_name(&run.case_name, &run.content_id));
    let file = File::create(&path).map_err(|source| ParseError::Io {
        path: path.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, run).map_err(|source| ParseError::Json {
        path: path.clone(),
        source,
    })?;
    writer.flush().map_err(|source| ParseError::Io {
        path: path.clone(),
        source,
    })?;
    debug!(content_id = %run.content_id, path = %path.display(), "wrote silver states");
    Ok(path)
}

pub fn read_silver(dir: &Path, case: &str, id: &ContentId) -> Result<ParsedRun, ParseError> {
    let path = dir.join(silver_file_name(case, id));
    let file = File::open(&path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ParseError::MissingResultsFile { path: path.clone() },
        _ => ParseError::Io {
            path: path.clone(),
            source,
        },
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ParseError::Json { path, source })
}
