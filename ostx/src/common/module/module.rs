use crate::errors::OstxResult;
use crate::transaction::TransactionContext;
use std::any::Any;
use std::fmt::{Display, Formatter};

/// Resource domains that can take part in a transaction.
///
/// The derived ordering is the canonical lock order: at commit time modules are locked in
/// ascending `ModuleKind` order, never in registration order. Custom modules sort after every
/// built-in kind, by their numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModuleKind {
    /// Files and file descriptors
    File,
    /// Anonymous pipes
    Pipe,
    /// Thread identity and thread creation
    Thread,
    /// Scheduler interaction
    Sched,
    /// Application-defined resource domain
    Custom(u16),
}

impl Display for ModuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::File => write!(f, "file"),
            ModuleKind::Pipe => write!(f, "pipe"),
            ModuleKind::Thread => write!(f, "thread"),
            ModuleKind::Sched => write!(f, "sched"),
            ModuleKind::Custom(id) => write!(f, "custom-{}", id),
        }
    }
}

/// Contract every resource domain implements to take part in a transaction.
///
/// # Purpose
/// A module instance is created the first time a transaction touches a resource of its kind,
/// owns a private log of what the transaction did to those resources, and is driven by the
/// coordinator through the commit or abort lifecycle exactly once before being released.
///
/// # Lifecycle
/// - commit path: `lock` → `validate(true)` → `apply` → `finish` → `unlock` → `release`
/// - abort path: (`lock` →) (`validate` →) `undo` → `finish` → (`unlock` →) `release`
///
/// `unlock` is called exactly once for every successful `lock`. Every operation has a no-op
/// default, so a domain only overrides what is relevant to it.
///
/// # Contract
/// - `lock` releases anything it partially acquired before returning an error.
/// - `validate` has no side effects.
/// - `apply` may only fail for reasons unrelated to contention; all fallibility that depends
///   on other transactions belongs in `lock` and `validate`.
/// - `undo` must be idempotent and must tolerate log entries that never took effect.
pub trait ModuleCapability: Any + Send {
    /// Resource domain of this module. Used for registration and lock ordering.
    fn kind(&self) -> ModuleKind;

    /// Acquires, with a bounded wait, every resource this module touched.
    fn lock(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        Ok(())
    }

    /// Releases the locks taken by [`lock`](Self::lock).
    fn unlock(&mut self, _ctx: &TransactionContext) {}

    /// Compares recorded snapshots against live state. `eotx` is `false` for early,
    /// mid-transaction validation.
    fn validate(&self, _ctx: &TransactionContext, _eotx: bool) -> bool {
        true
    }

    /// Performs all buffered effects. Commit path only.
    fn apply(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        Ok(())
    }

    /// Reverts speculative state from the private log. Abort path only.
    fn undo(&mut self, _ctx: &TransactionContext) -> OstxResult<()> {
        Ok(())
    }

    /// Cleanup that runs whatever the outcome.
    fn finish(&mut self, _ctx: &TransactionContext) {}

    /// Frees per-transaction state. The instance is not used afterwards.
    fn release(&mut self) {}

    /// Text-safe description of buffered records, one line per record.
    fn journal(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Owned, type-erased module bound to a single transaction.
pub struct Participant {
    inner: Box<dyn ModuleCapability>,
}

impl Participant {
    pub fn new<M: ModuleCapability>(module: M) -> Self {
        Participant {
            inner: Box::new(module),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.inner.kind()
    }

    /// Returns the concrete module if it is of type `M`.
    pub fn downcast_mut<M: ModuleCapability>(&mut self) -> Option<&mut M> {
        let any: &mut dyn Any = self.inner.as_mut();
        any.downcast_mut::<M>()
    }

    pub fn downcast_ref<M: ModuleCapability>(&self) -> Option<&M> {
        let any: &dyn Any = self.inner.as_ref();
        any.downcast_ref::<M>()
    }

    pub(crate) fn module(&self) -> &dyn ModuleCapability {
        self.inner.as_ref()
    }

    pub(crate) fn module_mut(&mut self) -> &mut dyn ModuleCapability {
        self.inner.as_mut()
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopModule;

    impl ModuleCapability for NoopModule {
        fn kind(&self) -> ModuleKind {
            ModuleKind::Custom(7)
        }
    }

    struct OtherModule;

    impl ModuleCapability for OtherModule {
        fn kind(&self) -> ModuleKind {
            ModuleKind::Custom(8)
        }
    }

    #[test]
    fn test_canonical_kind_order() {
        let mut kinds = vec![
            ModuleKind::Custom(2),
            ModuleKind::Sched,
            ModuleKind::Pipe,
            ModuleKind::Custom(1),
            ModuleKind::Thread,
            ModuleKind::File,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ModuleKind::File,
                ModuleKind::Pipe,
                ModuleKind::Thread,
                ModuleKind::Sched,
                ModuleKind::Custom(1),
                ModuleKind::Custom(2),
            ]
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ModuleKind::File.to_string(), "file");
        assert_eq!(ModuleKind::Custom(3).to_string(), "custom-3");
    }

    #[test]
    fn test_participant_downcast() {
        let mut participant = Participant::new(NoopModule);
        assert_eq!(participant.kind(), ModuleKind::Custom(7));
        assert!(participant.downcast_mut::<NoopModule>().is_some());
        assert!(participant.downcast_mut::<OtherModule>().is_none());
        assert!(participant.downcast_ref::<NoopModule>().is_some());
    }

    #[test]
    fn test_default_operations_are_noops() {
        let module = NoopModule;
        assert!(module.journal().is_empty());
    }
}
