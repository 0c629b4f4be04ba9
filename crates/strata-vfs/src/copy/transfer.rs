//! Byte movement: single-file copy, link recreation, and the tree walk.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{CopyMode, CopyUnit};
use crate::adaptor::{ByteReader, ByteWriter, WriteMode};
use crate::attributes::PathAttributes;
use crate::error::{VfsError, VfsResult};
use crate::filesystem::FileSystem;
use crate::path::VfsPath;

impl FileSystem {
    /// Run one unit: dispatch on the source kind, walking directories in two
    /// passes (create every directory, then copy every file).
    #[tracing::instrument(skip(self, target, unit), fields(copy = %unit.id()), name = "copy.tree")]
    pub(crate) async fn copy_unit(&self, target: &FileSystem, unit: &CopyUnit) -> VfsResult<()> {
        self.ensure_open()?;
        target.ensure_open()?;
        let source = unit.source();
        let destination = unit.destination();
        if self == target && destination.normalize().starts_with(&source.normalize()) {
            return Err(VfsError::invalid_path(format!(
                "cannot copy {source} onto itself or into its own subtree ({destination})"
            )));
        }

        let attrs = self.adaptor().stat(source).await?;
        if attrs.is_regular() {
            return self
                .copy_file(source, target, destination, unit.mode(), unit)
                .await;
        }
        if attrs.is_symbolic_link() {
            return self
                .copy_symbolic_link(source, target, destination, unit.mode(), unit)
                .await;
        }
        if !attrs.is_directory() {
            return Err(VfsError::invalid_path(format!(
                "{source} is not a file, directory or symbolic link"
            )));
        }
        if !unit.is_recursive() {
            return Err(VfsError::invalid_path(format!(
                "{source} is a directory; recursive copy required"
            )));
        }

        unit.check_cancelled()?;
        ensure_directory(target, destination).await?;

        let entries = self.list(source, true).await?;

        // Pass 1: directories, and the byte total
        let mut total = 0u64;
        let mut files = Vec::new();
        for entry in &entries {
            let relative = source.relativize(entry.path())?;
            let mirrored = destination.resolve(&relative);
            if entry.is_directory() {
                unit.check_cancelled()?;
                ensure_directory(target, &mirrored).await?;
            } else if entry.is_regular() {
                total += entry.size();
                files.push((entry.path().clone(), mirrored));
            } else {
                tracing::debug!("skipping {} ({:?}) inside tree copy", entry.path(), entry.kind());
            }
        }
        unit.set_bytes_to_copy(total);
        tracing::debug!("{} entries listed, {} files / {} bytes to copy", entries.len(), files.len(), total);

        // Pass 2: files
        for (from, to) in &files {
            self.copy_file(from, target, to, unit.mode(), unit).await?;
        }
        Ok(())
    }

    /// Copy one regular file, reconciling with an existing destination per
    /// `mode`.
    #[tracing::instrument(skip(self, target, unit), fields(copy = %unit.id()), name = "copy.file")]
    pub(crate) async fn copy_file(
        &self,
        source: &VfsPath,
        target: &FileSystem,
        destination: &VfsPath,
        mode: CopyMode,
        unit: &CopyUnit,
    ) -> VfsResult<()> {
        unit.check_cancelled()?;

        let attrs = self.adaptor().stat(source).await?;
        if !attrs.is_regular() {
            return Err(VfsError::invalid_path(format!(
                "{source} is not a regular file"
            )));
        }
        let size = attrs.size();
        require_parent_directory(target, destination).await?;

        let Some(existing) = stat_optional(target, destination).await? else {
            unit.set_bytes_to_copy_if_unknown(size);
            let writer = target
                .adaptor()
                .open_write(destination, WriteMode::CreateExclusive)
                .await?;
            let reader = self.adaptor().open_read(source).await?;
            return self.pump(reader, writer, source, destination, unit).await;
        };

        if mode == CopyMode::Ignore {
            tracing::debug!("{destination} exists, ignoring");
            unit.set_bytes_to_copy_if_unknown(0);
            return Ok(());
        }
        if !existing.is_regular() {
            return Err(VfsError::invalid_path(format!(
                "{destination} exists and is not a regular file"
            )));
        }

        match mode {
            CopyMode::Create | CopyMode::Ignore => Err(VfsError::already_exists(destination)),
            CopyMode::Replace => {
                unit.set_bytes_to_copy_if_unknown(size);
                let writer = target
                    .adaptor()
                    .open_write(destination, WriteMode::CreateOrTruncate)
                    .await?;
                let reader = self.adaptor().open_read(source).await?;
                self.pump(reader, writer, source, destination, unit).await
            }
            CopyMode::Append => {
                unit.set_bytes_to_copy_if_unknown(size);
                let writer = target
                    .adaptor()
                    .open_write(destination, WriteMode::Append)
                    .await?;
                let reader = self.adaptor().open_read(source).await?;
                self.pump(reader, writer, source, destination, unit).await
            }
            CopyMode::Resume { verify } => {
                self.resume(source, size, target, destination, existing.size(), verify, unit)
                    .await
            }
        }
    }

    /// Send the part of `source` the destination does not have yet.
    #[allow(clippy::too_many_arguments)]
    async fn resume(
        &self,
        source: &VfsPath,
        source_size: u64,
        target: &FileSystem,
        destination: &VfsPath,
        present: u64,
        verify: bool,
        unit: &CopyUnit,
    ) -> VfsResult<()> {
        if present > source_size {
            return Err(VfsError::invalid_data(format!(
                "{destination} ({present} bytes) is larger than {source} ({source_size} bytes)"
            )));
        }
        let remainder = source_size - present;
        if remainder == 0 {
            tracing::debug!("{destination} already complete");
            unit.set_bytes_to_copy_if_unknown(0);
            return Ok(());
        }

        let mut reader = self.adaptor().open_read(source).await?;
        if verify {
            let mut existing = target.adaptor().open_read(destination).await?;
            self.compare_prefix(&mut reader, &mut existing, present, source, destination, unit)
                .await?;
            unit.set_bytes_to_copy_if_unknown(remainder);
        } else {
            unit.set_bytes_to_copy_if_unknown(remainder);
            skip(&mut reader, present, self.config().buffer_size, source, unit).await?;
        }

        tracing::debug!("resuming {destination} at byte {present}");
        let writer = target
            .adaptor()
            .open_write(destination, WriteMode::Append)
            .await?;
        self.pump(reader, writer, source, destination, unit).await
    }

    /// Check that the first `len` bytes of both streams match.
    async fn compare_prefix(
        &self,
        source: &mut ByteReader,
        existing: &mut ByteReader,
        len: u64,
        source_path: &VfsPath,
        destination_path: &VfsPath,
        unit: &CopyUnit,
    ) -> VfsResult<()> {
        let chunk = self.config().buffer_size;
        let mut expected = vec![0u8; chunk];
        let mut actual = vec![0u8; chunk];
        let mut offset = 0u64;

        while offset < len {
            let n = usize::try_from(len - offset).map_or(chunk, |left| chunk.min(left));
            read_exact(source, &mut expected[..n], source_path).await?;
            read_exact(existing, &mut actual[..n], destination_path).await?;
            if let Some(at) = expected[..n].iter().zip(&actual[..n]).position(|(a, b)| a != b) {
                return Err(VfsError::invalid_data(format!(
                    "{destination_path} differs from {source_path} at byte {}",
                    offset + at as u64
                )));
            }
            offset += n as u64;
            unit.check_cancelled()?;
        }
        Ok(())
    }

    /// Stream `reader` into `writer`, recording progress after every buffer
    /// and stopping at the first cancellation checkpoint that fires.
    async fn pump(
        &self,
        mut reader: ByteReader,
        mut writer: ByteWriter,
        source: &VfsPath,
        destination: &VfsPath,
        unit: &CopyUnit,
    ) -> VfsResult<()> {
        let mut buf = vec![0u8; self.config().buffer_size];
        let streamed: VfsResult<()> = async {
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| VfsError::from_io(e, source))?;
                if n == 0 {
                    break;
                }
                writer
                    .write_all(&buf[..n])
                    .await
                    .map_err(|e| VfsError::from_io(e, destination))?;
                unit.add_bytes_copied(n as u64);
                unit.check_cancelled()?;
            }
            writer
                .flush()
                .await
                .map_err(|e| VfsError::from_io(e, destination))
        }
        .await;

        match streamed {
            Ok(()) => writer
                .shutdown()
                .await
                .map_err(|e| VfsError::from_io(e, destination)),
            Err(e) => {
                if let Err(close) = writer.shutdown().await {
                    tracing::warn!("closing {destination} after failure: {close}");
                }
                Err(e)
            }
        }
    }

    /// Recreate the link at `source` on the target. The link target is
    /// copied as a path; whatever it points to is not.
    #[tracing::instrument(skip(self, target, unit), fields(copy = %unit.id()), name = "copy.link")]
    pub(crate) async fn copy_symbolic_link(
        &self,
        source: &VfsPath,
        target: &FileSystem,
        destination: &VfsPath,
        mode: CopyMode,
        unit: &CopyUnit,
    ) -> VfsResult<()> {
        unit.check_cancelled()?;

        let attrs = self.adaptor().stat(source).await?;
        if !attrs.is_symbolic_link() {
            return Err(VfsError::invalid_path(format!(
                "{source} is not a symbolic link"
            )));
        }
        if matches!(mode, CopyMode::Append | CopyMode::Resume { .. }) {
            return Err(VfsError::unsupported(format!(
                "{mode} copy of symbolic link {source}"
            )));
        }

        let link_target = self.adaptor().read_symbolic_link(source).await?;
        require_parent_directory(target, destination).await?;
        unit.set_bytes_to_copy_if_unknown(0);

        if let Some(existing) = stat_optional(target, destination).await? {
            match mode {
                CopyMode::Ignore => {
                    tracing::debug!("{destination} exists, ignoring");
                    return Ok(());
                }
                CopyMode::Replace if !existing.is_directory() => {
                    target.adaptor().delete_file(destination).await?;
                }
                CopyMode::Replace => {
                    return Err(VfsError::invalid_path(format!(
                        "{destination} is a directory"
                    )));
                }
                _ => return Err(VfsError::already_exists(destination)),
            }
        }

        target
            .adaptor()
            .create_symbolic_link(destination, &link_target)
            .await
    }
}

/// Stat that turns `NoSuchPath` into `None`.
async fn stat_optional(fs: &FileSystem, path: &VfsPath) -> VfsResult<Option<PathAttributes>> {
    match fs.adaptor().stat(path).await {
        Ok(attrs) => Ok(Some(attrs)),
        Err(VfsError::NoSuchPath(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Fail unless the parent of `path` exists as a directory.
async fn require_parent_directory(fs: &FileSystem, path: &VfsPath) -> VfsResult<()> {
    let Some(parent) = path.parent() else {
        return Err(VfsError::invalid_path("cannot copy onto the root"));
    };
    let attrs = fs.adaptor().stat(&parent).await?;
    if attrs.is_directory() {
        Ok(())
    } else {
        Err(VfsError::invalid_path(format!("{parent} is not a directory")))
    }
}

/// Create `path` as a directory unless one is already there.
async fn ensure_directory(fs: &FileSystem, path: &VfsPath) -> VfsResult<()> {
    match stat_optional(fs, path).await? {
        Some(attrs) if attrs.is_directory() => Ok(()),
        Some(_) => Err(VfsError::invalid_path(format!(
            "{path} exists and is not a directory"
        ))),
        None => fs.adaptor().create_directory(path).await,
    }
}

async fn read_exact<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    path: &VfsPath,
) -> VfsResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(VfsError::invalid_data(
            format!("{path} ended before its reported size"),
        )),
        Err(e) => Err(VfsError::from_io(e, path)),
    }
}

/// Discard the first `len` bytes of `reader`, one buffer at a time, with a
/// cancellation checkpoint after each.
async fn skip<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    len: u64,
    chunk: usize,
    path: &VfsPath,
    unit: &CopyUnit,
) -> VfsResult<()> {
    let mut skipped = 0u64;
    while skipped < len {
        let step = (len - skipped).min(chunk as u64);
        let n = tokio::io::copy(&mut (&mut *reader).take(step), &mut tokio::io::sink())
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        if n < step {
            return Err(VfsError::invalid_data(format!(
                "{path} ended before byte {len}"
            )));
        }
        skipped += n;
        unit.check_cancelled()?;
    }
    Ok(())
}
