use ostx::common::{ModuleCapability, ModuleKind};
use ostx::errors::{ErrorKind, OstxError, OstxResult};
use ostx::fs::{self, OpenFlags};
use ostx::modules::FileModule;
use ostx::resource::ResourceId;
use ostx::transaction::{DeferredLog, LogRecord, PreState, TransactionContext};
use ostx::{AbortReason, CommitOutcome};
use ostx_int_test::test_util::{cleanup, create_test_context, run_test};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[ctor::ctor]
fn init() {
    colog::init();
}

static STORE: LazyLock<Mutex<BTreeMap<String, Vec<u8>>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

fn stored(key: &str) -> Option<Vec<u8>> {
    STORE.lock().get(key).cloned()
}

enum KvOp {
    Put(Vec<u8>),
    Delete,
}

/// In-memory key-value participant. Puts land at once and are compensated, deletes wait
/// for commit. Keys whose name starts with `poison` fail to apply.
#[derive(Default)]
struct KvModule {
    log: DeferredLog<KvOp>,
}

impl KvModule {
    fn put(&mut self, key: &str, value: &[u8]) {
        let pre_state = match STORE.lock().insert(key.to_string(), value.to_vec()) {
            Some(previous) => PreState::Bytes(previous),
            None => PreState::Absent,
        };
        self.log.append(LogRecord::eager(
            ResourceId::named(key),
            pre_state,
            KvOp::Put(value.to_vec()),
        ));
    }

    fn delete(&mut self, key: &str) {
        self.log
            .append(LogRecord::deferred(ResourceId::named(key), KvOp::Delete));
    }
}

fn key_of(id: &ResourceId) -> OstxResult<&str> {
    match id {
        ResourceId::Named(key) => Ok(key),
        other => Err(OstxError::new(
            &format!("{} is not a key", other),
            ErrorKind::InternalError,
        )),
    }
}

impl ModuleCapability for KvModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Custom(42)
    }

    fn apply(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        self.log
            .apply_all(|record| {
                let key = key_of(record.resource())?;
                if key.starts_with("poison") {
                    return Err(OstxError::new(
                        &format!("cannot apply {}", key),
                        ErrorKind::ModuleInternalError,
                    ));
                }
                if let KvOp::Delete = record.payload() {
                    STORE.lock().remove(key);
                }
                Ok(())
            })
            .map(|_| ())
    }

    fn undo(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        self.log
            .undo_all(|record| {
                let key = key_of(record.resource())?;
                match record.pre_state() {
                    Some(PreState::Bytes(previous)) => {
                        STORE.lock().insert(key.to_string(), previous.clone());
                    }
                    Some(PreState::Absent) => {
                        STORE.lock().remove(key);
                    }
                    _ => {}
                }
                Ok(())
            })
            .map(|_| ())
    }

    fn journal(&self) -> Vec<String> {
        self.log.journal(self.kind(), |op| match op {
            KvOp::Put(value) => ("put", Some(value.as_slice())),
            KvOp::Delete => ("delete", None),
        })
    }
}

#[test]
fn test_repeated_undo_restores_same_state() {
    run_test(
        create_test_context,
        |ctx| {
            let key = format!("k-{}", ctx.dir().display());
            let fresh = format!("fresh-{}", ctx.dir().display());
            STORE.lock().insert(key.clone(), b"v0".to_vec());

            let mut tx = ctx.manager().begin();
            tx.with_module::<KvModule, _, _>(|kv, _| {
                kv.put(&key, b"v1");
                kv.put(&key, b"v2");
                kv.put(&fresh, b"new");
                Ok(())
            })?;
            assert_eq!(stored(&key), Some(b"v2".to_vec()));

            tx.with_module::<KvModule, _, _>(|kv, ctx| kv.undo(ctx))?;
            let after_first = (stored(&key), stored(&fresh));
            tx.with_module::<KvModule, _, _>(|kv, ctx| kv.undo(ctx))?;
            let after_second = (stored(&key), stored(&fresh));

            assert_eq!(after_first, (Some(b"v0".to_vec()), None));
            assert_eq!(after_first, after_second);

            assert_eq!(tx.abort()?, CommitOutcome::Aborted(AbortReason::Requested));
            assert_eq!(stored(&key), Some(b"v0".to_vec()));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_apply_fault_reports_module_error() {
    run_test(
        create_test_context,
        |ctx| {
            let poisoned = format!("poison-{}", ctx.dir().display());
            let path = ctx.file("alongside.txt");

            let mut tx = ctx.manager().begin();
            let fd = fs::open(&mut tx, &path, OpenFlags::new().write(true).create(true))?;
            fs::write(&mut tx, fd, b"still written")?;
            tx.with_module::<KvModule, _, _>(|kv, _| {
                kv.delete(&poisoned);
                Ok(())
            })?;

            let outcome = tx.commit()?;
            assert_eq!(
                outcome,
                CommitOutcome::Aborted(AbortReason::ModuleError(
                    ErrorKind::ModuleInternalError.code()
                ))
            );
            // other participants were applied regardless
            assert_eq!(std::fs::read(&path).unwrap(), b"still written");
            assert_eq!(ctx.manager().stats().faulted, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_file_module_undo_is_idempotent() {
    run_test(
        create_test_context,
        |ctx| {
            let created = ctx.file("created.bin");
            let adopted_path = ctx.file("adopted.bin");
            std::fs::write(&adopted_path, b"0123456789").unwrap();
            let mut outer = std::fs::File::open(&adopted_path).unwrap();
            std::io::Seek::seek(&mut outer, std::io::SeekFrom::Start(4)).unwrap();

            let mut tx = ctx.manager().begin();
            fs::open(&mut tx, &created, OpenFlags::new().write(true).create(true))?;
            let fd = fs::adopt(&mut tx, &outer, &adopted_path)?;
            assert_eq!(fs::read(&mut tx, fd, 3)?, b"456");

            tx.with_module::<FileModule, _, _>(|files, ctx| files.undo(ctx))?;
            assert!(!created.exists());
            assert_eq!(std::io::Seek::stream_position(&mut outer).unwrap(), 4);

            tx.with_module::<FileModule, _, _>(|files, ctx| files.undo(ctx))?;
            assert!(!created.exists());
            assert_eq!(std::io::Seek::stream_position(&mut outer).unwrap(), 4);

            tx.abort()?;
            assert_eq!(std::fs::read(&adopted_path).unwrap(), b"0123456789");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_custom_module_journal() {
    run_test(
        create_test_context,
        |ctx| {
            let mut tx = ctx.manager().begin();
            tx.with_module::<KvModule, _, _>(|kv, _| {
                kv.delete("gone");
                Ok(())
            })?;
            let journal = tx.journal();
            assert_eq!(journal, vec!["custom-42 delete named:gone -".to_string()]);
            tx.abort()?;
            Ok(())
        },
        cleanup,
    )
}
