use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::UpdateError;

static SIBLING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// True for anything at `path`, dangling symlinks included.
pub(crate) fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub(crate) fn remove_entry_if_exists(path: &Path) -> Result<(), UpdateError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(UpdateError::io("stat", path)(err)),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(UpdateError::io("remove directory", path))
    } else {
        fs::remove_file(path).map_err(UpdateError::io("remove file", path))
    }
}

/// `path` with `suffix` appended to its final component.
pub(crate) fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

/// A not-yet-existing sibling of `path`, so renames between the two stay on
/// one volume.
pub(crate) fn unique_sibling(path: &Path, label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    loop {
        let sequence = SIBLING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = suffixed_path(
            path,
            &format!("-{label}-{}-{nanos}-{sequence}", std::process::id()),
        );
        if !entry_exists(&candidate) {
            return candidate;
        }
    }
}

pub(crate) fn rename(from: &Path, to: &Path) -> Result<(), UpdateError> {
    fs::rename(from, to).map_err(|source| UpdateError::Io {
        op: "rename",
        path: format!("{} -> {}", from.display(), to.display()).into(),
        source,
    })
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), UpdateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(UpdateError::io("create directory", parent))?;
        }
    }
    Ok(())
}

/// Copies a single file through a temp sibling so `dst` only ever holds a
/// complete copy.
pub(crate) fn copy_file_atomic(src: &Path, dst: &Path) -> Result<(), UpdateError> {
    ensure_parent_dir(dst)?;
    let partial = unique_sibling(dst, "partial");
    if let Err(err) = fs::copy(src, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(UpdateError::Io {
            op: "copy",
            path: format!("{} -> {}", src.display(), dst.display()).into(),
            source: err,
        });
    }
    if let Err(err) = rename(&partial, dst) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    Ok(())
}

pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), UpdateError> {
    let metadata = fs::metadata(src).map_err(UpdateError::io("stat", src))?;
    if !metadata.is_dir() {
        return Err(UpdateError::Io {
            op: "copy directory",
            path: src.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
        });
    }

    fs::create_dir_all(dst).map_err(UpdateError::io("create directory", dst))?;
    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((src.to_path_buf(), dst.to_path_buf()));

    while let Some((from_dir, to_dir)) = queue.pop_front() {
        for entry in fs::read_dir(&from_dir).map_err(UpdateError::io("read directory", &from_dir))? {
            let entry = entry.map_err(UpdateError::io("read directory", &from_dir))?;
            let from_path = entry.path();
            let to_path = to_dir.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(UpdateError::io("stat", &from_path))?;

            if file_type.is_dir() {
                fs::create_dir_all(&to_path)
                    .map_err(UpdateError::io("create directory", &to_path))?;
                queue.push_back((from_path, to_path));
                continue;
            }

            #[cfg(unix)]
            if file_type.is_symlink() {
                let target =
                    fs::read_link(&from_path).map_err(UpdateError::io("read symlink", &from_path))?;
                std::os::unix::fs::symlink(&target, &to_path)
                    .map_err(UpdateError::io("create symlink", &to_path))?;
                continue;
            }

            fs::copy(&from_path, &to_path).map_err(|source| UpdateError::Io {
                op: "copy",
                path: format!("{} -> {}", from_path.display(), to_path.display()).into(),
                source,
            })?;
        }
    }

    Ok(())
}

/// Every regular file at or below `root`. Missing roots yield nothing.
pub(crate) fn files_under(root: &Path) -> Result<Vec<PathBuf>, UpdateError> {
    let metadata = match fs::symlink_metadata(root) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(UpdateError::io("stat", root)(err)),
    };
    if !metadata.is_dir() {
        return Ok(if metadata.is_file() {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let mut files = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());
    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir).map_err(UpdateError::io("read directory", &dir))? {
            let entry = entry.map_err(UpdateError::io("read directory", &dir))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(UpdateError::io("stat", &path))?;
            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
