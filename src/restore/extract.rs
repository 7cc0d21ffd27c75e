// clustervault/src/restore/extract.rs
use flate2::read::GzDecoder;
use std::fs::{self, DirBuilder, File, FileTimes};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::{symlink, DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{AppError, Result};

/// Extracted files between two progress lines.
pub const PROGRESS_INTERVAL: u64 = 100;

const WAL_DIR: &str = "pg_wal";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

fn extraction_error(path: &Path, source: io::Error) -> AppError {
    AppError::Extraction {
        path: path.to_path_buf(),
        source,
    }
}

fn create_private_dir_all(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o700).create(path)
}

/// Where a tar member unpacks: `pg_wal.tar*` into `<data>/pg_wal`, everything else into the root.
pub fn member_destination(member: &Path, data_dir: &Path) -> PathBuf {
    let name = member.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name.starts_with("pg_wal.tar") {
        data_dir.join(WAL_DIR)
    } else {
        data_dir.to_path_buf()
    }
}

fn open_member(member: &Path) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(member)?);
    let is_gzip = member.extension().is_some_and(|ext| ext == "gz");
    if is_gzip {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Extracts every member in order. The first failing entry aborts the whole extraction.
pub fn extract_tar_members(members: &[PathBuf], data_dir: &Path) -> Result<ExtractionSummary> {
    info!("📦 Extracting {} tar backup files...", members.len());
    let mut summary = ExtractionSummary::default();
    for member in members {
        let destination = member_destination(member, data_dir);
        extract_tar_member(member, &destination, &mut summary)?;
    }
    info!(
        "✓ All tar files extracted ({} files, {} directories)",
        summary.files, summary.directories
    );
    Ok(summary)
}

/// Unpacks one member into `destination`. Entries that would land outside
/// it, directly or through an extracted symlink, fail the extraction.
pub fn extract_tar_member(
    member: &Path,
    destination: &Path,
    summary: &mut ExtractionSummary,
) -> Result<()> {
    let base_name = member.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    info!("Extracting: {} -> {}", base_name, destination.display());

    create_private_dir_all(destination).map_err(|e| extraction_error(destination, e))?;
    let reader = open_member(member).map_err(|e| extraction_error(member, e))?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    let entries = archive.entries().map_err(|e| extraction_error(member, e))?;

    let mut file_count: u64 = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| extraction_error(member, e))?;
        let relative = entry
            .path()
            .map_err(|e| extraction_error(member, e))?
            .into_owned();
        let target = destination.join(&relative);
        let entry_type = entry.header().entry_type();
        let size = entry.size();

        let unpacked = entry
            .unpack_in(destination)
            .map_err(|e| extraction_error(&target, e))?;
        if !unpacked {
            return Err(extraction_error(
                &target,
                io::Error::new(io::ErrorKind::InvalidData, "entry path leaves the destination"),
            ));
        }

        match entry_type {
            EntryType::Directory => summary.directories += 1,
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                summary.files += 1;
                summary.bytes += size;
                file_count += 1;
                if file_count % PROGRESS_INTERVAL == 0 {
                    info!("  Extracted {} files...", file_count);
                }
            }
            EntryType::Symlink => summary.symlinks += 1,
            other => debug!("Unpacked {:?} entry {}", other, relative.display()),
        }
    }

    info!("Progress: 100%");
    Ok(())
}

fn set_mtime(path: &Path, modified: SystemTime) -> io::Result<()> {
    File::open(path)?.set_times(FileTimes::new().set_modified(modified))
}

/// Recursive copy of a plain-format backup, keeping permission bits,
/// modification times and symlinks.
pub fn copy_plain_backup(source: &Path, data_dir: &Path) -> Result<ExtractionSummary> {
    info!("📦 Copying plain backup files...");
    create_private_dir_all(data_dir).map_err(|e| extraction_error(data_dir, e))?;

    let mut summary = ExtractionSummary::default();
    // Directory modes and mtimes are applied last so read-only directories can still be filled
    let mut directories = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            extraction_error(&path, io::Error::from(e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| {
                extraction_error(entry.path(), io::Error::new(io::ErrorKind::InvalidInput, e))
            })?;
        let target = data_dir.join(relative);
        let file_type = entry.file_type();
        let metadata = entry
            .metadata()
            .map_err(|e| extraction_error(entry.path(), io::Error::from(e)))?;

        if file_type.is_dir() {
            create_private_dir_all(&target).map_err(|e| extraction_error(&target, e))?;
            let modified = metadata.modified().map_err(|e| extraction_error(entry.path(), e))?;
            directories.push((target, metadata.permissions().mode(), modified));
            summary.directories += 1;
        } else if file_type.is_symlink() {
            let link_target =
                fs::read_link(entry.path()).map_err(|e| extraction_error(entry.path(), e))?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target).map_err(|e| extraction_error(&target, e))?;
            }
            symlink(&link_target, &target).map_err(|e| extraction_error(&target, e))?;
            summary.symlinks += 1;
        } else if file_type.is_file() {
            let copied = fs::copy(entry.path(), &target)
                .and_then(|copied| {
                    set_mtime(&target, metadata.modified()?)?;
                    Ok(copied)
                })
                .map_err(|e| extraction_error(&target, e))?;
            summary.bytes += copied;
            summary.files += 1;
            if summary.files % PROGRESS_INTERVAL == 0 {
                info!("  Copied {} files...", summary.files);
            }
        } else {
            warn!("⚠️ Skipping special file {}", entry.path().display());
        }
    }

    for (path, mode, modified) in directories.iter().rev() {
        set_mtime(path, *modified)
            .and_then(|_| fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)))
            .map_err(|e| extraction_error(path, e))?;
    }

    info!("✓ Plain backup copied ({} files)", summary.files);
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};

    pub(crate) enum Item<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8], u32),
        Link(&'a str, &'a str),
    }

    /// Writes a tar (gzip-compressed when the name ends in `.gz`) holding `items`.
    pub(crate) fn write_tar(path: &Path, items: &[Item<'_>]) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let write_items = |builder: &mut Builder<Box<dyn io::Write>>| -> anyhow::Result<()> {
            for item in items {
                let mut header = Header::new_gnu();
                match item {
                    Item::Dir(name) => {
                        header.set_entry_type(EntryType::Directory);
                        header.set_mode(0o700);
                        header.set_size(0);
                        builder.append_data(&mut header, name, io::empty())?;
                    }
                    Item::File(name, content, mode) => {
                        header.set_entry_type(EntryType::Regular);
                        header.set_mode(*mode);
                        header.set_size(content.len() as u64);
                        builder.append_data(&mut header, name, *content)?;
                    }
                    Item::Link(name, target) => {
                        header.set_entry_type(EntryType::Symlink);
                        header.set_size(0);
                        builder.append_link(&mut header, name, target)?;
                    }
                }
            }
            Ok(())
        };

        let writer: Box<dyn io::Write> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        let mut builder = Builder::new(writer);
        write_items(&mut builder)?;
        // Dropping the boxed GzEncoder finishes the gzip stream
        drop(builder.into_inner()?);
        Ok(())
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_extract_gzip_member_preserves_modes() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let member = root.path().join("base.tar.gz");
        write_tar(
            &member,
            &[
                Item::Dir("global"),
                Item::File("PG_VERSION", b"16\n", 0o600),
                Item::File("global/pg_control", &[0u8; 8192], 0o600),
                Item::File("base/1/112", b"relation", 0o640),
                Item::Link("pg_tblspc/16385", "/mnt/ts"),
            ],
        )?;
        let data = root.path().join("data");

        let summary = extract_tar_members(&[member], &data)?;
        assert_eq!(summary.files, 3);
        assert_eq!(summary.directories, 1);
        assert_eq!(summary.symlinks, 1);
        assert_eq!(summary.bytes, 3 + 8192 + 8);
        assert_eq!(fs::read(data.join("base/1/112"))?, b"relation");
        assert_eq!(mode_of(&data.join("base/1/112")), 0o640);
        assert_eq!(mode_of(&data.join("PG_VERSION")), 0o600);
        assert_eq!(fs::read_link(data.join("pg_tblspc/16385"))?, PathBuf::from("/mnt/ts"));
        Ok(())
    }

    #[test]
    fn test_wal_member_lands_in_pg_wal() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let base = root.path().join("base.tar");
        let wal = root.path().join("pg_wal.tar");
        write_tar(&base, &[Item::Dir("pg_wal"), Item::File("PG_VERSION", b"16\n", 0o600)])?;
        write_tar(
            &wal,
            &[
                Item::File("000000010000000000000002", &[1u8; 512], 0o600),
                Item::Dir("archive_status"),
            ],
        )?;
        let data = root.path().join("data");

        extract_tar_members(&[base, wal], &data)?;
        assert!(data.join("pg_wal/000000010000000000000002").is_file());
        assert!(data.join("pg_wal/archive_status").is_dir());
        assert!(!data.join("000000010000000000000002").exists());
        Ok(())
    }

    #[test]
    fn test_many_files_extract_with_progress() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let member = root.path().join("base.tar.gz");
        let names: Vec<String> = (0..250).map(|i| format!("base/5/{}", 16384 + i)).collect();
        let items: Vec<Item<'_>> = names
            .iter()
            .map(|n| Item::File(n.as_str(), b"x", 0o600))
            .collect();
        write_tar(&member, &items)?;

        let summary = extract_tar_members(&[member], &root.path().join("data"))?;
        assert_eq!(summary.files, 250);
        Ok(())
    }

    #[test]
    fn test_corrupt_member_names_path() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let member = root.path().join("base.tar.gz");
        fs::write(&member, b"definitely not gzip")?;

        let err = extract_tar_members(&[member.clone()], &root.path().join("data")).unwrap_err();
        match err {
            AppError::Extraction { path, .. } => assert_eq!(path, member),
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_symlink_cannot_redirect_later_entries() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let outside = root.path().join("outside");
        fs::create_dir(&outside)?;
        let outside_str = outside.to_string_lossy().into_owned();
        let member = root.path().join("base.tar");
        write_tar(
            &member,
            &[
                Item::Link("escape", &outside_str),
                Item::File("escape/planted", b"owned", 0o600),
            ],
        )?;
        let data = root.path().join("data");

        let err = extract_tar_members(&[member], &data).unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
        assert!(!outside.join("planted").exists());
        Ok(())
    }

    #[test]
    fn test_member_destination() {
        let data = Path::new("/var/lib/postgresql/data");
        assert_eq!(member_destination(Path::new("/b/base.tar.gz"), data), data);
        assert_eq!(member_destination(Path::new("/b/pg_wal.tar"), data), data.join("pg_wal"));
        assert_eq!(member_destination(Path::new("/b/16385.tar"), data), data);
    }

    #[test]
    fn test_copy_plain_backup() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("backup");
        fs::create_dir_all(source.join("global"))?;
        fs::create_dir_all(source.join("pg_wal"))?;
        fs::write(source.join("PG_VERSION"), b"16\n")?;
        fs::write(source.join("global/pg_control"), vec![0u8; 8192])?;
        fs::set_permissions(source.join("global/pg_control"), fs::Permissions::from_mode(0o600))?;
        fs::set_permissions(source.join("global"), fs::Permissions::from_mode(0o700))?;
        symlink("/mnt/wal", source.join("pg_wal/link"))?;
        let data = root.path().join("data");

        let summary = copy_plain_backup(&source, &data)?;
        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.symlinks, 1);
        assert_eq!(fs::read(data.join("PG_VERSION"))?, b"16\n");
        assert_eq!(mode_of(&data.join("global/pg_control")), 0o600);
        assert_eq!(mode_of(&data.join("global")), 0o700);
        assert_eq!(fs::read_link(data.join("pg_wal/link"))?, PathBuf::from("/mnt/wal"));
        Ok(())
    }

    #[test]
    fn test_copy_plain_backup_keeps_mtimes() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("backup");
        fs::create_dir_all(source.join("base/1"))?;
        fs::write(source.join("base/1/1259"), b"catalog")?;
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        set_mtime(&source.join("base/1/1259"), stamp)?;
        set_mtime(&source.join("base/1"), stamp)?;
        let data = root.path().join("data");

        copy_plain_backup(&source, &data)?;
        assert_eq!(fs::metadata(data.join("base/1/1259"))?.modified()?, stamp);
        assert_eq!(fs::metadata(data.join("base/1"))?.modified()?, stamp);
        Ok(())
    }
}
