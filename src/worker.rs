use super::handoff::Handoff;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;


/// Долгоживущий исполнитель пула.
///
/// Idle -> (пришла задача) -> Executing -> Idle; отмена токена пула
/// переводит воркер в Stopped. Текущую задачу воркер дорабатывает,
/// отмена проверяется только в состоянии Idle.
pub(crate) struct Worker {
    id: usize,
    handoff: Arc<Handoff>,
    active_workers: Arc<AtomicUsize>,
    lifecycle: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        handoff: Arc<Handoff>,
        active_workers: Arc<AtomicUsize>,
        lifecycle: CancellationToken,
    ) -> Self {
        Self {
            id,
            handoff,
            active_workers,
            lifecycle,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::trace!(worker = self.id, "worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.lifecycle.cancelled() => break,
                job = self.handoff.recv() => job,
            };

            self.active_workers.fetch_add(1, Ordering::AcqRel);
            // Ошибки и паники задачи обрабатывает сама Job, сюда они не доходят
            job.await;
            self.active_workers.fetch_sub(1, Ordering::AcqRel);
            self.handoff.release();
        }

        tracing::trace!(worker = self.id, "worker stopped");
    }
}
