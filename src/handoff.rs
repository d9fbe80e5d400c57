use super::job::Dispatch;
use crossbeam::deque::{Injector, Steal};
use tokio::sync::{Notify, Semaphore, SemaphorePermit};


/// Общий канал передачи задач от очередей к воркерам пула.
///
/// Буфера на уровне пула нет: задачу можно опубликовать только через
/// `reserve`, который ждет, пока освободится воркер. Вся буферизация и backpressure
/// живут в очередях.
pub(crate) struct Handoff {
    inject: Injector<Dispatch>,
    ready: Notify,
    idle: Semaphore,
}

impl Handoff {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            inject: Injector::new(),
            ready: Notify::new(),
            idle: Semaphore::new(num_workers),
        }
    }

    /// Ждет свободного воркера. `None`, если канал закрыт.
    /// Если слот не использован, он возвращается при drop.
    pub(crate) async fn reserve(&self) -> Option<Slot<'_>> {
        let permit = self.idle.acquire().await.ok()?;
        Some(Slot {
            handoff: self,
            permit,
        })
    }

    pub(crate) async fn recv(&self) -> Dispatch {
        loop {
            if let Some(job) = self.try_take() {
                if !self.inject.is_empty() {
                    self.ready.notify_one();
                }
                return job;
            }
            self.ready.notified().await;
        }
    }

    #[inline]
    fn try_take(&self) -> Option<Dispatch> {
        std::iter::repeat_with(|| self.inject.steal())
            .find(|s| !s.is_retry())
            .and_then(Steal::success)
    }

    /// Воркер снова свободен
    #[inline]
    pub(crate) fn release(&self) {
        self.idle.add_permits(1);
    }

    pub(crate) fn close(&self) {
        self.idle.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.idle.is_closed()
    }
}


/// Зарезервированный свободный воркер
pub(crate) struct Slot<'a> {
    handoff: &'a Handoff,
    permit: SemaphorePermit<'a>,
}

impl Slot<'_> {
    pub(crate) fn send(self, job: Dispatch) {
        // Слот возвращается воркером через `release` после выполнения
        self.permit.forget();
        self.handoff.inject.push(job);
        self.handoff.ready.notify_one();
    }
}
