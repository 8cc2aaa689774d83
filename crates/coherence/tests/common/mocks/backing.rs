use coherence_core::common::{BlockAddr, LineData};
use coherence_core::memory::{BackingStore, MemCompletion};
use mockall::mock;

mock! {
    pub Backing {}
    impl BackingStore for Backing {
        fn begin_read(&mut self, addr: BlockAddr);
        fn begin_write(&mut self, addr: BlockAddr, data: LineData);
        fn poll(&mut self) -> Option<MemCompletion>;
        fn abort(&mut self);
        fn peek(&self, addr: BlockAddr) -> LineData;
    }
}

/// A successful completion carrying `data`.
pub const fn done(data: LineData) -> Option<MemCompletion> {
    Some(MemCompletion { ok: true, data })
}

/// A failed completion.
pub const fn failed() -> Option<MemCompletion> {
    Some(MemCompletion { ok: false, data: 0 })
}
