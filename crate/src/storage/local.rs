//! Local filesystem side of the saver.

use std::path::{Path, PathBuf};

use glob::MatchOptions;
use tokio::fs;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Size of the chunks streamed into a destination file.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Execute bits always added to created directories so they stay traversable.
pub const DIR_EXEC_BITS: u32 = 0o111;

/// Creates the parent directory of `path` if it is missing.
///
/// Every directory created along the way gets `permission | 0o111`, still
/// subject to the process umask.
pub async fn ensure_parent_dir(path: &Path, permission: u32) -> io::Result<()> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    if fs::try_exists(parent).await? {
        return Ok(());
    }
    debug!("Creating directory {}", parent.display());
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(permission | DIR_EXEC_BITS);
    #[cfg(not(unix))]
    let _ = permission;
    builder.create(parent).await
}

/// Streams `source` into `path`, truncating any existing file, and returns the
/// size of the file on disk afterwards.
///
/// The file is written in place: an error part way through leaves a partial
/// file behind.
pub async fn write_chunked<R>(source: &mut R, path: &Path) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    info!("Writing object to local storage at path: {}", path.display());
    let mut file = fs::File::create(path).await?;
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let read = source.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        file.write_all(&chunk[..read]).await?;
    }
    file.flush().await?;
    drop(file);
    Ok(fs::metadata(path).await?.len())
}

/// Removes `path`, treating a missing file as already removed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("Deleted local file {}", path.display());
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Returns every path matching the glob `{prefix}*`, sorted.
///
/// `prefix` is a glob pattern itself, so wildcards in any component are
/// expanded. Hidden entries only match a literal leading dot. Entries that
/// cannot be read while walking are skipped. The directory walk blocks the
/// calling task until it is done.
pub async fn find_with_prefix(prefix: &str) -> io::Result<Vec<PathBuf>> {
    expand_glob(&format!("{prefix}*"))
}

fn expand_glob(pattern: &str) -> io::Result<Vec<PathBuf>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let entries = glob::glob_with(pattern, options)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let mut matches = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => matches.push(path),
            Err(err) => debug!("Skipping {}: {}", err.path().display(), err.error()),
        }
    }
    matches.sort();
    debug!("Pattern {} matched {} entries", pattern, matches.len());
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_in_chunks_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let payload: Vec<u8> = (0..(COPY_CHUNK_SIZE * 2 + 17)).map(|i| i as u8).collect();
        let size = write_chunked(&mut payload.as_slice(), &path).await.unwrap();

        assert_eq!(size, payload.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), payload);

        let size = write_chunked(&mut &b"abc"[..], &path).await.unwrap();
        assert_eq!(size, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_directories_are_traversable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file.txt");
        ensure_parent_dir(&path, 0o600).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("a/b")).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
        assert!(dir.path().join("a/b").is_dir());
    }

    #[tokio::test]
    async fn removing_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        assert!(!remove_if_exists(&path).await.unwrap());

        std::fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }

    fn under(dir: &Path, rest: &str) -> String {
        format!("{}/{rest}", dir.display())
    }

    #[tokio::test]
    async fn prefix_search_matches_last_component() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["photo-1.jpg", "photo-2.jpg", "other.jpg", ".photo-hidden"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos/inner.jpg"), b"x").unwrap();

        let found = find_with_prefix(&under(dir.path(), "photo")).await.unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("photo-1.jpg"),
                dir.path().join("photo-2.jpg"),
                dir.path().join("photos"),
            ]
        );

        let found = find_with_prefix(&under(dir.path(), "")).await.unwrap();
        assert_eq!(found.len(), 4);

        let hidden = find_with_prefix(&under(dir.path(), ".photo")).await.unwrap();
        assert_eq!(hidden, vec![dir.path().join(".photo-hidden")]);
    }

    #[tokio::test]
    async fn prefix_search_expands_wildcards_in_directories() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["subA", "subB", "other"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("subA/pic.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("subB/pic-2.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("other/pic.jpg"), b"x").unwrap();

        let found = find_with_prefix(&under(dir.path(), "sub*/pic")).await.unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("subA/pic.jpg"),
                dir.path().join("subB/pic-2.jpg"),
            ]
        );

        let found = find_with_prefix(&under(dir.path(), "sub?/pic.")).await.unwrap();
        assert_eq!(found, vec![dir.path().join("subA/pic.jpg")]);
    }

    #[tokio::test]
    async fn prefix_search_in_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = find_with_prefix(&under(dir.path(), "nope/pic")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn malformed_pattern_is_rejected() {
        let err = find_with_prefix("[unclosed").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
