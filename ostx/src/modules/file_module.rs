use crate::common::{HeldLocks, ModuleCapability, ModuleKind};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::{AccessSet, ResourceId};
use crate::transaction::{DeferredLog, LogRecord, PreState, TransactionContext};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Transaction-local file descriptor returned by [`FileModule::open`] and
/// [`FileModule::adopt`]. Valid only inside the transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHandle(u32);

impl Display for FileHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd#{}", self.0)
    }
}

/// How [`FileModule::open`] opens a file. Mirrors the subset of
/// [`std::fs::OpenOptions`] a transaction can revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    read: bool,
    write: bool,
    append: bool,
    create: bool,
}

impl OpenFlags {
    pub fn new() -> Self {
        OpenFlags::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Writes go to the logical end of the file, whatever the current offset.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Creates the file if missing. A file created this way is removed again on abort.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    fn writable(&self) -> bool {
        self.write || self.append
    }
}

#[derive(Debug)]
enum FileOp {
    Create,
    Adopt { handle: FileHandle },
    Write { handle: FileHandle, offset: u64, bytes: Vec<u8> },
    Remove,
}

#[derive(Debug)]
struct OpenFile {
    id: ResourceId,
    file: File,
    offset: u64,
    flags: OpenFlags,
    adopted: bool,
    closed: bool,
}

/// File participant.
///
/// Creation and descriptor adoption take effect at once and are compensated on abort.
/// Writes and removals are buffered and only reach the file system in `apply`. Reads are
/// served from the file overlaid with the transaction's own pending writes, so the
/// transaction sees its writes while nobody else does.
#[derive(Debug, Default)]
pub struct FileModule {
    next_handle: u32,
    handles: BTreeMap<FileHandle, OpenFile>,
    removed: BTreeSet<ResourceId>,
    log: DeferredLog<FileOp>,
    access: AccessSet,
    held: HeldLocks,
}

impl FileModule {
    /// Opens `path` for the transaction.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] if the file does not exist and `create` is not set, or if the
    /// transaction already removed it.
    pub fn open(
        &mut self,
        ctx: &TransactionContext,
        path: &Path,
        flags: OpenFlags,
    ) -> OstxResult<FileHandle> {
        let id = ResourceId::Path(resource_path(path));
        self.ensure_not_removed(&id)?;

        let (file, created) = open_file(path, flags)?;

        if created {
            log::trace!("Transaction {} created {}", ctx.id(), id);
            self.log
                .append(LogRecord::eager(id.clone(), PreState::Absent, FileOp::Create));
            self.access.write(ctx.versions(), &id);
        } else {
            self.access.observe(ctx.versions(), &id);
        }

        Ok(self.insert_handle(OpenFile {
            id,
            file,
            offset: 0,
            flags,
            adopted: false,
            closed: false,
        }))
    }

    /// Brings an already open descriptor into the transaction.
    ///
    /// The descriptor is duplicated, so its offset is shared with `file`. On abort the offset
    /// is restored to where it was at adoption, on commit it is left at the logical offset.
    pub fn adopt(
        &mut self,
        ctx: &TransactionContext,
        file: &File,
        path: &Path,
    ) -> OstxResult<FileHandle> {
        let id = ResourceId::Path(resource_path(path));
        self.ensure_not_removed(&id)?;

        let mut duplicate = file.try_clone()?;
        let original = duplicate.stream_position()?;
        self.access.observe(ctx.versions(), &id);

        let handle = self.insert_handle(OpenFile {
            id: id.clone(),
            file: duplicate,
            offset: original,
            flags: OpenFlags::new().read(true).write(true),
            adopted: true,
            closed: false,
        });
        self.log.append(LogRecord::eager(
            id,
            PreState::Offset(original),
            FileOp::Adopt { handle },
        ));
        Ok(handle)
    }

    /// Reads up to `len` bytes at the handle's logical offset and advances it.
    pub fn read(
        &mut self,
        ctx: &TransactionContext,
        handle: FileHandle,
        len: usize,
    ) -> OstxResult<Vec<u8>> {
        let (id, offset) = {
            let open = self.handle(handle)?;
            if !open.flags.read {
                return Err(OstxError::new(
                    &format!("{} is not open for reading", handle),
                    ErrorKind::InvalidOperation,
                ));
            }
            (open.id.clone(), open.offset)
        };
        self.ensure_not_removed(&id)?;
        self.access.observe(ctx.versions(), &id);

        let mut buf = {
            let open = self.handle_mut(handle)?;
            read_at(&mut open.file, offset, len)?
        };
        self.overlay_pending(&id, offset, len, &mut buf);

        self.handle_mut(handle)?.offset = offset + buf.len() as u64;
        Ok(buf)
    }

    /// Buffers a write of `bytes` at the handle's logical offset, or at the logical end of
    /// file in append mode. Returns the number of bytes accepted.
    pub fn write(
        &mut self,
        ctx: &TransactionContext,
        handle: FileHandle,
        bytes: &[u8],
    ) -> OstxResult<usize> {
        let (id, flags, current) = {
            let open = self.handle(handle)?;
            (open.id.clone(), open.flags, open.offset)
        };
        if !flags.writable() {
            return Err(OstxError::new(
                &format!("{} is not open for writing", handle),
                ErrorKind::InvalidOperation,
            ));
        }
        self.ensure_not_removed(&id)?;

        let offset = if flags.append {
            self.logical_len(handle)?
        } else {
            current
        };

        self.access.write(ctx.versions(), &id);
        self.log.append(LogRecord::deferred(
            id,
            FileOp::Write {
                handle,
                offset,
                bytes: bytes.to_vec(),
            },
        ));
        self.handle_mut(handle)?.offset = offset + bytes.len() as u64;
        Ok(bytes.len())
    }

    /// Moves the logical offset. The descriptor itself does not move until commit.
    pub fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> OstxResult<u64> {
        let base = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.handle(handle)?.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.logical_len(handle)?.checked_add_signed(delta),
        };
        let offset = base.ok_or_else(|| {
            OstxError::new(
                &format!("Seek on {} to a negative or overflowing offset", handle),
                ErrorKind::InvalidOperation,
            )
        })?;
        self.handle_mut(handle)?.offset = offset;
        Ok(offset)
    }

    /// Current logical offset of `handle`.
    pub fn tell(&self, handle: FileHandle) -> OstxResult<u64> {
        Ok(self.handle(handle)?.offset)
    }

    /// Buffers removal of `path`.
    pub fn remove(&mut self, ctx: &TransactionContext, path: &Path) -> OstxResult<()> {
        let id = ResourceId::Path(resource_path(path));
        self.ensure_not_removed(&id)?;
        if std::fs::symlink_metadata(path).is_err() {
            return Err(OstxError::new(
                &format!("Cannot remove {}, it does not exist", path.display()),
                ErrorKind::NotFound,
            ));
        }

        self.access.write(ctx.versions(), &id);
        self.log.append(LogRecord::deferred(id.clone(), FileOp::Remove));
        self.removed.insert(id);
        Ok(())
    }

    /// Makes `handle` unusable for the rest of the transaction. Buffered writes through it
    /// are still applied on commit.
    pub fn close(&mut self, handle: FileHandle) -> OstxResult<()> {
        self.handle_mut(handle)?.closed = true;
        Ok(())
    }

    pub fn pending_writes(&self) -> usize {
        self.log
            .iter()
            .filter(|r| matches!(r.payload(), FileOp::Write { .. }))
            .count()
    }

    fn insert_handle(&mut self, open: OpenFile) -> FileHandle {
        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, open);
        handle
    }

    fn handle(&self, handle: FileHandle) -> OstxResult<&OpenFile> {
        match self.handles.get(&handle) {
            Some(open) if !open.closed => Ok(open),
            _ => Err(unknown_handle(handle)),
        }
    }

    fn handle_mut(&mut self, handle: FileHandle) -> OstxResult<&mut OpenFile> {
        match self.handles.get_mut(&handle) {
            Some(open) if !open.closed => Ok(open),
            _ => Err(unknown_handle(handle)),
        }
    }

    fn ensure_not_removed(&self, id: &ResourceId) -> OstxResult<()> {
        if self.removed.contains(id) {
            return Err(OstxError::new(
                &format!("{} was removed by this transaction", id),
                ErrorKind::NotFound,
            ));
        }
        Ok(())
    }

    /// File length as the transaction sees it: on-disk length extended by pending writes.
    fn logical_len(&self, handle: FileHandle) -> OstxResult<u64> {
        let open = self.handle(handle)?;
        let on_disk = open.file.metadata()?.len();
        let pending = self
            .log
            .iter()
            .filter(|r| r.resource() == &open.id)
            .filter_map(|r| match r.payload() {
                FileOp::Write { offset, bytes, .. } => Some(offset + bytes.len() as u64),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok(on_disk.max(pending))
    }

    fn overlay_pending(&self, id: &ResourceId, offset: u64, len: usize, buf: &mut Vec<u8>) {
        let end = offset + len as u64;
        for record in self.log.iter().filter(|r| r.resource() == id) {
            if let FileOp::Write {
                offset: at, bytes, ..
            } = record.payload()
            {
                let start = (*at).max(offset);
                let stop = (at + bytes.len() as u64).min(end);
                if start >= stop {
                    continue;
                }
                let needed = (stop - offset) as usize;
                if buf.len() < needed {
                    buf.resize(needed, 0);
                }
                let src = (start - at) as usize;
                let dst = (start - offset) as usize;
                let n = (stop - start) as usize;
                buf[dst..dst + n].copy_from_slice(&bytes[src..src + n]);
            }
        }
    }
}

impl ModuleCapability for FileModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::File
    }

    fn lock(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let ids = self.access.observed().cloned().collect::<Vec<_>>();
        self.held
            .acquire_all(ctx.locks(), ids, ctx.id(), ctx.config().lock_timeout())
    }

    fn unlock(&mut self, ctx: &TransactionContext) {
        self.held.release_all(ctx.locks(), ctx.id());
    }

    fn validate(&self, ctx: &TransactionContext, _eotx: bool) -> bool {
        self.access.validate(ctx.versions())
    }

    fn apply(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let handles = &mut self.handles;
        let mut result = self
            .log
            .apply_all(|record| match record.payload() {
                FileOp::Create | FileOp::Adopt { .. } => Ok(()),
                FileOp::Write {
                    handle,
                    offset,
                    bytes,
                } => {
                    let open = handles.get_mut(handle).ok_or_else(|| unknown_handle(*handle))?;
                    write_at(&mut open.file, *offset, bytes)
                        .map_err(|e| apply_error(record.resource(), e))
                }
                FileOp::Remove => match record.resource() {
                    ResourceId::Path(path) => {
                        std::fs::remove_file(path).map_err(|e| apply_error(record.resource(), e))
                    }
                    other => Err(OstxError::new(
                        &format!("{} is not a file", other),
                        ErrorKind::InternalError,
                    )),
                },
            })
            .map(|_| ());

        if result.is_ok() {
            for open in self.handles.values_mut().filter(|open| open.adopted) {
                if let Err(e) = open.file.seek(SeekFrom::Start(open.offset)) {
                    result = Err(apply_error(&open.id, e));
                    break;
                }
            }
        }

        // a failed apply may already have changed some files
        self.access.publish(ctx.versions());
        result
    }

    fn undo(&mut self, ctx: &TransactionContext) -> OstxResult<()> {
        let handles = &mut self.handles;
        let access = &self.access;
        let held = &self.held;
        let result = self
            .log
            .undo_all(|record| match (record.payload(), record.pre_state()) {
                (FileOp::Create, Some(PreState::Absent)) => match record.resource() {
                    ResourceId::Path(path) => {
                        remove_created(ctx, access, held, record.resource(), path)
                    }
                    _ => Ok(()),
                },
                (FileOp::Adopt { handle }, Some(PreState::Offset(original))) => {
                    match handles.get_mut(handle) {
                        Some(open) => open
                            .file
                            .seek(SeekFrom::Start(*original))
                            .map(|_| ())
                            .map_err(|e| apply_error(record.resource(), e)),
                        None => Ok(()),
                    }
                }
                _ => Ok(()),
            });
        self.removed.clear();
        result.map(|_| ())
    }

    fn finish(&mut self, _ctx: &TransactionContext) {
        // drops the duplicated descriptors
        self.handles.clear();
    }

    fn release(&mut self) {
        self.log.discard();
        self.removed.clear();
        self.access.clear();
    }

    fn journal(&self) -> Vec<String> {
        self.log.journal(ModuleKind::File, |op| match op {
            FileOp::Create => ("create", None),
            FileOp::Adopt { .. } => ("adopt", None),
            FileOp::Write { bytes, .. } => ("write", Some(bytes.as_slice())),
            FileOp::Remove => ("remove", None),
        })
    }
}

/// Canonical form of `path` so that two spellings of one file share a version and a lock.
fn resource_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// Opens `path`, reporting whether this call created it. Creation is exclusive, so a file
/// that appears concurrently is never mistaken for one this transaction created.
fn open_file(path: &Path, flags: OpenFlags) -> std::io::Result<(File, bool)> {
    let mut options = OpenOptions::new();
    options.read(flags.read).write(flags.writable());
    if flags.create {
        let mut exclusive = options.clone();
        match exclusive.write(true).create_new(true).open(path) {
            Ok(file) => return Ok((file, true)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    options.open(path).map(|file| (file, false))
}

/// Reverts a creation by this transaction.
///
/// The file is only removed while it is still at the version seen when it was created, and
/// the check and the removal happen under the resource lock. A file another transaction
/// committed to in the meantime is left in place.
fn remove_created(
    ctx: &TransactionContext,
    access: &AccessSet,
    held: &HeldLocks,
    id: &ResourceId,
    path: &Path,
) -> OstxResult<()> {
    let borrowed = !held.holds(id);
    if borrowed && !ctx.locks().acquire(id, ctx.id(), ctx.config().lock_timeout()) {
        log::warn!("Transaction {} cannot revert creation of {}, it is busy", ctx.id(), id);
        return Err(OstxError::new(
            &format!("Cannot revert creation of {}, resource is busy", id),
            ErrorKind::ResourceBusy,
        ));
    }

    let result = if access.is_current(ctx.versions(), id) {
        match std::fs::remove_file(path) {
            Ok(()) => {
                ctx.versions().bump(id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(apply_error(id, e)),
        }
    } else {
        log::debug!(
            "Transaction {} keeps {}, another transaction committed to it",
            ctx.id(),
            id
        );
        Ok(())
    };

    if borrowed {
        ctx.locks().release(id, ctx.id());
    }
    result
}

fn read_at(file: &mut File, offset: u64, len: usize) -> OstxResult<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    Read::by_ref(file).take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    file.flush()
}

fn unknown_handle(handle: FileHandle) -> OstxError {
    OstxError::new(
        &format!("{} is not open in this transaction", handle),
        ErrorKind::NotFound,
    )
}

fn apply_error(id: &ResourceId, e: std::io::Error) -> OstxError {
    OstxError::new_with_cause(
        &format!("File operation on {} failed", id),
        ErrorKind::ModuleInternalError,
        OstxError::from(e),
    )
}
