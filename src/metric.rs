use crate::error::{Error, Result};
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Scalar logger.
pub trait ScalarLogger: Send {
    /// Record `value` for `tag` at the given global step.
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    /// Make every recorded value durable.
    fn flush(&mut self) -> Result<()>;
}

/// Scalar logger writing one `step,value` file per tag.
///
/// Tags are turned into file names by replacing `/` with `_`, so `Loss/total` is written to
/// `Loss_total.log`.
pub struct FileScalarLogger {
    writers: HashMap<String, BufWriter<File>>,
    directory: PathBuf,
}

impl FileScalarLogger {
    /// Create a new file scalar logger, creating the directory when needed.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|source| Error::ArtifactDir {
            path: directory.clone(),
            source,
        })?;

        Ok(Self {
            writers: HashMap::new(),
            directory,
        })
    }

    fn file_path(&self, tag: &str) -> PathBuf {
        self.directory.join(format!("{}.log", tag.replace('/', "_")))
    }

    /// Read back every `(step, value)` recorded for a tag.
    pub fn read_scalars(&mut self, tag: &str) -> Result<Vec<(usize, f64)>> {
        if let Some(writer) = self.writers.get_mut(tag) {
            writer.flush()?;
        }

        let content = fs::read_to_string(self.file_path(tag))?;
        content
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let parse_error = || Error::ScalarLog(line.to_string());
                let (step, value) = line.split_once(',').ok_or_else(parse_error)?;
                let step = step.parse::<usize>().map_err(|_| parse_error())?;
                let value = value.parse::<f64>().map_err(|_| parse_error())?;

                Ok((step, value))
            })
            .collect()
    }
}

impl ScalarLogger for FileScalarLogger {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        if !self.writers.contains_key(tag) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_path(tag))?;
            self.writers.insert(tag.to_string(), BufWriter::new(file));
        }

        if let Some(writer) = self.writers.get_mut(tag) {
            writeln!(writer, "{step},{value}")?;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }

        Ok(())
    }
}

impl Drop for FileScalarLogger {
    fn drop(&mut self) {
        if let Err(err) = ScalarLogger::flush(self) {
            log::warn!("Failed to flush scalars: {err}");
        }
    }
}

/// In memory scalar logger.
#[derive(Default, Debug, Clone)]
pub struct InMemoryScalarLogger {
    pub(crate) values: Vec<(String, usize, f64)>,
}

impl InMemoryScalarLogger {
    /// Every `(step, value)` recorded for a tag.
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f64)> {
        self.values
            .iter()
            .filter(|(name, _, _)| name == tag)
            .map(|(_, step, value)| (*step, *value))
            .collect()
    }
}

impl ScalarLogger for InMemoryScalarLogger {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.values.push((tag.to_string(), step, value));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logger_writes_one_file_per_tag() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileScalarLogger::new(dir.path().join("runs")).unwrap();

        logger.log_scalar("Loss/total", 1.5, 0).unwrap();
        logger.log_scalar("Loss/total", 0.5, 1).unwrap();
        logger.log_scalar("KL_weight", 0.1, 0).unwrap();
        logger.flush().unwrap();

        assert!(dir.path().join("runs").join("Loss_total.log").exists());
        assert_eq!(
            logger.read_scalars("Loss/total").unwrap(),
            vec![(0, 1.5), (1, 0.5)]
        );
        assert_eq!(logger.read_scalars("KL_weight").unwrap(), vec![(0, 0.1)]);
    }

    #[test]
    fn in_memory_logger_filters_by_tag() {
        let mut logger = InMemoryScalarLogger::default();

        logger.log_scalar("a", 1.0, 0).unwrap();
        logger.log_scalar("b", 2.0, 0).unwrap();
        logger.log_scalar("a", 3.0, 1).unwrap();

        assert_eq!(logger.scalars("a"), vec![(0, 1.0), (1, 3.0)]);
    }
}
