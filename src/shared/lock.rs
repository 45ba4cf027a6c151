use anyhow::{Context, Result, bail};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

// Exclusive claim on the modem for one process. The serial line carries one
// conversation at a time, so an upload and the vehicle loop never share it.
// The lock file holds the owner's pid so a refused claim can name it.
pub struct ModemLock {
    file: File,
    path: PathBuf,
}

impl ModemLock {
    pub fn claim(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating lock directory failed: {}", dir.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file failed: {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                let owner = read_owner(&mut file).unwrap_or_else(|| "unknown".to_string());
                bail!("modem is in use by pid {owner}: {}", path.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("locking failed: {}", path.display()));
            }
        }

        record_owner(&mut file)
            .with_context(|| format!("writing lock owner failed: {}", path.display()))?;
        debug!(lock = %path.display(), "modem claimed");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ModemLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(lock = %self.path.display(), "modem released");
    }
}

fn read_owner(file: &mut File) -> Option<String> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    let pid = text.trim();
    (!pid.is_empty()).then(|| pid.to_string())
}

fn record_owner(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_names_the_owner_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("modem.lock");

        let first = ModemLock::claim(&path).unwrap();
        let pid = std::process::id().to_string();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), pid);

        let err = ModemLock::claim(&path).err().unwrap();
        assert!(err.to_string().contains(&pid), "{err}");

        drop(first);
        assert!(ModemLock::claim(&path).is_ok());
    }
}
