// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use common_telemetry::{debug, info};
use snafu::{ensure, ResultExt};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{
    CancelledSnafu, CreateArchiveEntrySnafu, FinishArchiveSnafu, OpenFileSnafu, ReadFileSnafu,
    Result, WalkSnapshotDirSnafu, WriteArchiveEntrySnafu,
};
use crate::export::ExportStage;

/// Prefix of every entry in an archive unless configured otherwise.
pub const DEFAULT_ARCHIVE_BASE_PATH: &str = "data";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

const ENTRY_PERMISSIONS: u32 = 0o644;

/// Packs a directory tree into a zip archive.
///
/// Entries are visited depth first in file name order and carry fixed
/// metadata, so the same tree always produces the same bytes. Only regular
/// files become entries; directories are implied by the entry names.
#[derive(Debug, Clone)]
pub struct ZipArchiveBuilder {
    source_dir: PathBuf,
    base_path: String,
}

impl ZipArchiveBuilder {
    pub fn new(source_dir: impl Into<PathBuf>, base_path: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            base_path: base_path.into(),
        }
    }

    /// Writes the archive into `dest` and returns it after the central
    /// directory has been written.
    ///
    /// `cancel` is checked before every entry and between copied chunks.
    /// On error `dest` holds a partial archive and must be discarded.
    pub fn create_archive<W: Write + Seek>(&self, dest: W, cancel: &CancellationToken) -> Result<W> {
        let mut zip = ZipWriter::new(dest);
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let root_depth = self.source_dir.components().count();
        let mut files = 0usize;
        let mut bytes = 0u64;

        for entry in WalkDir::new(&self.source_dir).sort_by_file_name() {
            ensure_not_cancelled(cancel)?;

            let entry = entry.with_context(|_| WalkSnapshotDirSnafu {
                path: self.source_dir.display().to_string(),
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                debug!("Skip non-regular file {}", entry.path().display());
                continue;
            }

            let name = self.entry_name(entry.path(), root_depth);
            bytes += self.write_entry(&mut zip, entry.path(), &name, &mut buf, cancel)?;
            files += 1;
        }

        let dest = zip.finish().context(FinishArchiveSnafu)?;
        info!(
            "Archived {} files ({} bytes) from {}",
            files,
            bytes,
            self.source_dir.display()
        );
        Ok(dest)
    }

    fn write_entry<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        path: &Path,
        name: &str,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let path_str = || path.display().to_string();
        let mut file = File::open(path).with_context(|_| OpenFileSnafu { path: path_str() })?;
        let len = file
            .metadata()
            .with_context(|_| ReadFileSnafu { path: path_str() })?
            .len();

        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(ENTRY_PERMISSIONS)
            .large_file(len >= u32::MAX as u64);
        zip.start_file(name, options)
            .with_context(|_| CreateArchiveEntrySnafu {
                entry: name,
                path: path_str(),
            })?;

        let mut written = 0u64;
        loop {
            ensure_not_cancelled(cancel)?;
            let n = file
                .read(buf)
                .with_context(|_| ReadFileSnafu { path: path_str() })?;
            if n == 0 {
                break;
            }
            zip.write_all(&buf[..n])
                .context(WriteArchiveEntrySnafu { entry: name })?;
            written += n as u64;
        }

        Ok(written)
    }

    /// `base_path` joined with the path of `path` below the source directory,
    /// separated by `/` on every platform.
    fn entry_name(&self, path: &Path, root_depth: usize) -> String {
        let base = self
            .base_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let relative = path
            .components()
            .skip(root_depth)
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            });
        base.chain(relative).collect::<Vec<_>>().join("/")
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    ensure!(
        !cancel.is_cancelled(),
        CancelledSnafu {
            stage: ExportStage::Archiving
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{self, Cursor};

    use common_error::ext::ErrorExt;
    use common_test_util::temp_dir::{create_temp_dir, write_files};
    use zip::ZipArchive;

    use super::*;
    use crate::error::{Error, ExportErrorKind};

    fn archive(dir: &Path, base: &str) -> Vec<u8> {
        ZipArchiveBuilder::new(dir, base)
            .create_archive(Cursor::new(Vec::new()), &CancellationToken::new())
            .unwrap()
            .into_inner()
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        zip.file_names().map(|s| s.to_string()).collect()
    }

    fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        content
    }

    fn ordered_names(bytes: &[u8]) -> Vec<String> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_entry_names_and_content() {
        let dir = create_temp_dir("archive_paths");
        write_files(
            dir.path(),
            &[
                ("a/b/c.txt", b"hello"),
                ("chunks_head/000001", b"0123456789"),
                ("index", b""),
            ],
        );

        let bytes = archive(dir.path(), "data");
        let mut names = entry_names(&bytes);
        names.sort();
        assert_eq!(
            vec!["data/a/b/c.txt", "data/chunks_head/000001", "data/index"],
            names
        );
        assert_eq!(b"hello".to_vec(), read_entry(&bytes, "data/a/b/c.txt"));
        assert_eq!(
            b"0123456789".to_vec(),
            read_entry(&bytes, "data/chunks_head/000001")
        );
        assert!(read_entry(&bytes, "data/index").is_empty());

        let bytes = archive(dir.path(), "");
        assert_eq!(b"hello".to_vec(), read_entry(&bytes, "a/b/c.txt"));

        let bytes = archive(dir.path(), "/nested/base/");
        assert_eq!(b"hello".to_vec(), read_entry(&bytes, "nested/base/a/b/c.txt"));
    }

    #[test]
    fn test_archive_is_deterministic() {
        let dir = create_temp_dir("archive_determinism");
        write_files(
            dir.path(),
            &[
                ("b/2", b"two"),
                ("a/1", b"one"),
                ("c", b"three"),
                ("a/0/z", b"zero"),
            ],
        );

        let first = archive(dir.path(), "data");
        let second = archive(dir.path(), "data");
        assert_eq!(first, second);
        assert_eq!(
            vec!["data/a/0/z", "data/a/1", "data/b/2", "data/c"],
            ordered_names(&first)
        );
    }

    #[test]
    fn test_empty_dir() {
        let dir = create_temp_dir("archive_empty");
        fs::create_dir_all(dir.path().join("empty/nested")).unwrap();

        let bytes = archive(dir.path(), "data");
        assert!(entry_names(&bytes).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_skip_symlink() {
        let dir = create_temp_dir("archive_symlink");
        write_files(dir.path(), &[("a", b"a")]);
        std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("link")).unwrap();

        let bytes = archive(dir.path(), "data");
        assert_eq!(vec!["data/a"], ordered_names(&bytes));
    }

    #[test]
    fn test_missing_source_dir() {
        let dir = create_temp_dir("archive_missing");
        let missing = dir.path().join("not-exist");

        let err = ZipArchiveBuilder::new(&missing, "data")
            .create_archive(Cursor::new(Vec::new()), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(ExportErrorKind::Filesystem, err.kind());
        assert!(matches!(err, Error::WalkSnapshotDir { .. }));
        assert!(err.to_string().contains("not-exist"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = create_temp_dir("archive_unreadable");
        write_files(dir.path(), &[("a/ok", b"ok"), ("a/b/secret", b"secret")]);
        let secret = dir.path().join("a/b/secret");
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&secret).is_ok() {
            // Running with privileges that bypass file permissions.
            return;
        }

        let err = ZipArchiveBuilder::new(dir.path(), "data")
            .create_archive(Cursor::new(Vec::new()), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::OpenFile { .. }), "{err:?}");
        assert!(err.to_string().contains("secret"), "{err}");
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = create_temp_dir("archive_cancel_before");
        write_files(dir.path(), &[("a", b"a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ZipArchiveBuilder::new(dir.path(), "data")
            .create_archive(Cursor::new(Vec::new()), &cancel)
            .unwrap_err();
        assert_eq!(ExportErrorKind::Cancellation, err.kind());
        assert_eq!(Some(ExportStage::Archiving), err.stage());
    }

    /// A destination that cancels the token on its first write.
    #[derive(Debug)]
    struct CancelOnWrite {
        inner: Cursor<Vec<u8>>,
        cancel: CancellationToken,
    }

    impl Write for CancelOnWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.cancel.cancel();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for CancelOnWrite {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_cancelled_mid_archive() {
        let dir = create_temp_dir("archive_cancel_mid");
        write_files(
            dir.path(),
            &[("a/1", &[1u8; 4096]), ("a/2", &[2u8; 4096]), ("b", b"b")],
        );
        let cancel = CancellationToken::new();
        let dest = CancelOnWrite {
            inner: Cursor::new(Vec::new()),
            cancel: cancel.clone(),
        };

        let err = ZipArchiveBuilder::new(dir.path(), "data")
            .create_archive(dest, &cancel)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Cancelled {
                stage: ExportStage::Archiving,
                ..
            }
        ));
    }

    /// A destination whose writes always fail.
    #[derive(Debug)]
    struct BrokenDest;

    impl Write for BrokenDest {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for BrokenDest {
        fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_broken_destination() {
        let dir = create_temp_dir("archive_broken_dest");
        write_files(dir.path(), &[("a", b"a")]);

        let err = ZipArchiveBuilder::new(dir.path(), "data")
            .create_archive(BrokenDest, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(ExportErrorKind::Filesystem, err.kind());
        assert!(err.output_msg().contains("disk full"), "{}", err.output_msg());
    }
}
