use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use env_logger::{Env, Target};

/// Name of the run log inside the logging directory.
pub const LOG_FILE: &str = "txt_logs";

/// Writes every record to the run log and to stderr.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stderr().flush()
    }
}

/// Installs the global logger, appending to `<logging_path>/txt_logs`.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Installing a
/// second logger in the same process is a silent no-op.
///
/// # Errors
/// Returns an io error if the log file can't be opened.
pub fn init(logging_path: &Path) -> io::Result<()> {
    fs::create_dir_all(logging_path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logging_path.join(LOG_FILE))?;

    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init();

    Ok(())
}
