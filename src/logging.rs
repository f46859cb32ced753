//! Log sink shared by the binaries: every line goes to stderr and to a
//! timestamped file under the log directory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

pub type LogFile = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.log`.
pub fn open_log_file<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<(LogFile, PathBuf)> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.log", prefix, ts));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    eprintln!("Log: {}", path.display());
    let writer: Box<dyn Write + Send> = Box::new(BufWriter::new(file));
    Ok((Arc::new(Mutex::new(writer)), path))
}

/// Log sink that only writes to stderr
pub fn stderr_only() -> LogFile {
    let writer: Box<dyn Write + Send> = Box::new(std::io::sink());
    Arc::new(Mutex::new(writer))
}

/// Write a line to the file sink with a wall-clock prefix.
pub fn write_line(logfile: &LogFile, msg: &str) {
    if let Ok(mut f) = logfile.lock() {
        let ts = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(f, "[{}] {}", ts, msg);
        let _ = f.flush();
    }
}

#[macro_export]
macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        $crate::logging::write_line(&$logfile, &msg);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_receives_lines() {
        let dir = std::env::temp_dir().join(format!("sign_gesture_logs_{}", std::process::id()));
        let (logfile, path) = open_log_file(&dir, "test").unwrap();
        crate::log!(logfile, "hello {}", 42);
        drop(logfile);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_end().ends_with("hello 42"), "{:?}", content);
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("test_"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stderr_only_accepts_lines() {
        let logfile = stderr_only();
        crate::log!(logfile, "discarded");
    }
}
