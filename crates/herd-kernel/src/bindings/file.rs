use std::io::Write;
use std::path::{Path, PathBuf};

/// Command/response file pair, used when no control port is configured.
///
/// Protocol: the client writes exactly one command line to the command
/// file and watches the response file; the kernel polls the command file
/// each iteration, replaces the response file atomically, and deletes the
/// command file as the acknowledgement.
#[derive(Debug)]
pub struct FileTransport {
    command_path: PathBuf,
    response_path: PathBuf,
}

impl FileTransport {
    pub fn new(command_path: PathBuf, response_path: PathBuf) -> Self {
        Self {
            command_path,
            response_path,
        }
    }

    /// First line of the command file, if one is waiting.
    pub fn poll(&self) -> std::io::Result<Option<String>> {
        let content = match std::fs::read_to_string(&self.command_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let line = content.lines().next().unwrap_or("").trim().to_string();
        if line.is_empty() {
            // A client left an empty file behind; swallow it.
            let _ = std::fs::remove_file(&self.command_path);
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Write the response atomically and consume the command file.
    pub fn acknowledge(&self, response: &str) -> std::io::Result<()> {
        let dir = self
            .response_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(response.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.response_path)
            .map_err(|err| err.error)?;
        std::fs::remove_file(&self.command_path)
    }
}
