use crate::common::{ModuleCapability, ModuleKind};
use crate::resource::ResourceId;
use crate::transaction::{JournalLine, TransactionContext};

/// Scheduler participant. Yielding has no effect to revert, so every lifecycle step is the
/// default no-op; the module only counts yields for the journal.
#[derive(Debug, Default)]
pub struct SchedModule {
    yields: u32,
}

impl SchedModule {
    pub fn yield_now(&mut self, _ctx: &TransactionContext) {
        self.yields += 1;
        std::thread::yield_now();
    }

    pub fn yields(&self) -> u32 {
        self.yields
    }
}

impl ModuleCapability for SchedModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Sched
    }

    fn release(&mut self) {
        self.yields = 0;
    }

    fn journal(&self) -> Vec<String> {
        let resource = ResourceId::named("scheduler");
        let line = JournalLine::new(ModuleKind::Sched, "yield", &resource, &[]).render();
        vec![line; self.yields as usize]
    }
}
