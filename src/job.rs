use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;


/// Задача, стертая по типам результата: в таком виде ее принимают воркеры пула.
/// Один пул обслуживает очереди с разными `T` и `E`.
pub type Dispatch = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub type TaskFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// Единица работы: без аргументов, возвращает результат или ошибку.
///
/// Реализован для любых `FnOnce() -> impl Future<Output = Result<T, E>>`,
/// поэтому обычно достаточно передать async-замыкание. Контекст ошибки
/// (какой вход ее вызвал) задача должна вложить в `E` сама.
pub trait Task<T, E>: Send + 'static {
    fn execute(self: Box<Self>) -> TaskFuture<T, E>;
}

impl<F, Fut, T, E> Task<T, E> for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    #[inline]
    fn execute(self: Box<Self>) -> TaskFuture<T, E> {
        Box::pin((*self)())
    }
}


/// Обертка для синхронных замыканий: тело выполняется в blocking-пуле tokio,
/// воркер все это время считается занятым.
pub struct Blocking<F>(pub F);

impl<F, T, E> Task<T, E> for Blocking<F>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute(self: Box<Self>) -> TaskFuture<T, E> {
        let f = self.0;
        Box::pin(async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(outcome) => outcome,
                // Паника пробрасывается дальше и ловится в Job::run
                Err(join_err) => match join_err.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(join_err) => std::panic::resume_unwind(Box::new(join_err.to_string())),
                },
            }
        })
    }
}


/// Задача, привязанная к каналам и счетчикам своей очереди.
/// Создается в `JobQueue::add_job`, исполняется ровно один раз одним воркером.
pub struct Job<T, E> {
    pub(crate) task: Box<dyn Task<T, E>>,
    pub(crate) result_sink: mpsc::Sender<T>,
    pub(crate) error_sink: mpsc::Sender<E>,
    pub(crate) successes: Arc<AtomicUsize>,
    pub(crate) failures: Arc<AtomicUsize>,
    pub(crate) finished: Arc<Notify>,
    /// Токен очереди (отменяется и вместе с пулом): ограничивает доставку
    /// результата, чтобы невычитанный канал не заблокировал воркер навсегда.
    pub(crate) lifecycle: CancellationToken,
}

impl<T, E> Job<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub async fn run(self) {
        let Job {
            task,
            result_sink,
            error_sink,
            successes,
            failures,
            finished,
            lifecycle,
        } = self;

        let outcome = AssertUnwindSafe(async move { task.execute().await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                if !deliver(&result_sink, value, &lifecycle).await {
                    tracing::debug!("result dropped, queue cancelled or receiver gone");
                }
                successes.fetch_add(1, Ordering::AcqRel);
            }
            Ok(Err(err)) => {
                if !deliver(&error_sink, err, &lifecycle).await {
                    tracing::debug!("error dropped, queue cancelled or receiver gone");
                }
                failures.fetch_add(1, Ordering::AcqRel);
            }
            Err(panic_info) => {
                tracing::error!(panic = %panic_message(&*panic_info), "task panicked, counted as failure");
                failures.fetch_add(1, Ordering::AcqRel);
            }
        }

        finished.notify_waiters();
    }

    #[inline]
    pub fn into_dispatch(self) -> Dispatch {
        Box::pin(self.run())
    }
}

async fn deliver<V>(sink: &mpsc::Sender<V>, value: V, lifecycle: &CancellationToken) -> bool {
    tokio::select! {
        sent = sink.send(value) => sent.is_ok(),
        _ = lifecycle.cancelled() => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        format!("{:?}", payload)
    }
}
