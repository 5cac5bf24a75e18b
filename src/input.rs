use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};

/// Where events are read from.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub enum FileOrStdin {
    /// Events from a file.
    File(Utf8PathBuf),
    /// Events from stdin.
    #[default]
    Stdin,
}

impl fmt::Display for FileOrStdin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOrStdin::File(path) => write!(f, "{}", path),
            FileOrStdin::Stdin => write!(f, "<stdin>"),
        }
    }
}

impl FileOrStdin {
    /// Create a source from a command-line path; "-" means stdin.
    pub fn from_path(path: Utf8PathBuf) -> Self {
        if path.as_str() == "-" {
            FileOrStdin::Stdin
        } else {
            FileOrStdin::File(path)
        }
    }

    /// Open the source for reading.
    pub fn reader(&self) -> Result<InputReader> {
        match self {
            FileOrStdin::File(path) => {
                let file =
                    File::open(path).with_context(|| format!("failed to open file: {}", path))?;
                Ok(InputReader::File(BufReader::new(file)))
            }
            FileOrStdin::Stdin => Ok(InputReader::Stdin(BufReader::new(io::stdin()))),
        }
    }
}

/// An open event source.
pub enum InputReader {
    File(BufReader<File>),
    Stdin(BufReader<io::Stdin>),
}

impl Read for InputReader {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            InputReader::File(rdr) => rdr.read(buf),
            InputReader::Stdin(rdr) => rdr.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dash_is_stdin() {
        assert_eq!(FileOrStdin::from_path("-".into()), FileOrStdin::Stdin);
        assert_eq!(FileOrStdin::Stdin.to_string(), "<stdin>");
        assert_eq!(
            FileOrStdin::from_path("events.json".into()),
            FileOrStdin::File("events.json".into())
        );
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"a\":1}\n{\"a\":2}\n").unwrap();
        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf()).unwrap();

        let mut contents = String::new();
        FileOrStdin::from_path(path)
            .reader()
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn missing_file_names_path() {
        let err = FileOrStdin::from_path("/nonexistent/events.json".into())
            .reader()
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/events.json"));
    }
}
