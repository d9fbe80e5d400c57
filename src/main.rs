use bounded_pool::{Config, PoolError, WorkerPool};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};


#[derive(Debug)]
struct Probe {
    response_time_ms: u64,
    data_size: u64,
}

#[derive(Debug)]
struct ProbeError {
    target: String,
}

/// Детерминированный "случайный" шум для синтетических проб
#[inline(always)]
fn xorshift(mut state: u64) -> u64 {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

async fn probe(index: u64) -> Result<Probe, ProbeError> {
    let noise = xorshift(index.wrapping_add(0x9E37_79B9_7F4A_7C15));
    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(5 + noise % 120)).await;

    if noise % 10 < 3 {
        return Err(ProbeError {
            target: format!("host-{index}.example"),
        });
    }

    Ok(Probe {
        response_time_ms: started.elapsed().as_millis() as u64,
        data_size: 512 + noise % 64_000,
    })
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bounded_pool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let total = env_u64("PROBE_COUNT", 500);
    tracing::info!(workers = config.num_workers, queue_capacity = config.queue_capacity, total, "starting probes");

    let now = Instant::now();
    let pool = WorkerPool::with_config(config, CancellationToken::new())?;
    let queue = pool.new_default_queue::<Probe, ProbeError>(None)?;

    let response_time_sum = Arc::new(AtomicU64::new(0));
    let data_size_sum = Arc::new(AtomicU64::new(0));

    let (mut results, mut errors) = match (queue.result_channel(), queue.error_channel()) {
        (Some(results), Some(errors)) => (results, errors),
        _ => return Err(PoolError::QueueClosed),
    };
    let report_rt = response_time_sum.clone();
    let report_ds = data_size_sum.clone();
    let monitor_token = queue.start_monitoring(Duration::from_millis(500), move |metrics| {
        let ok = metrics.succeeded.max(1) as u64;
        tracing::info!(
            workers = metrics.pool.total_workers,
            active = metrics.pool.active_workers,
            created = metrics.submitted,
            queued = metrics.queued,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            avg_response_ms = report_rt.load(Ordering::Relaxed) / ok,
            avg_size_bytes = report_ds.load(Ordering::Relaxed) / ok,
            "progress"
        );
    });

    let submitter = queue.clone();
    tokio::spawn(async move {
        for index in 0..total {
            if let Err(err) = submitter.add_job(move || probe(index)).await {
                tracing::warn!(error = %err, "submission stopped");
                break;
            }
        }
        submitter.close();
    });

    // Результат отправляется до инкремента счетчика, поэтому после
    // сигнала завершения все оставшиеся значения уже лежат в каналах
    let finished = queue.wait_finished();
    tokio::pin!(finished);
    loop {
        tokio::select! {
            Some(res) = results.recv() => {
                response_time_sum.fetch_add(res.response_time_ms, Ordering::Relaxed);
                data_size_sum.fetch_add(res.data_size, Ordering::Relaxed);
            }
            Some(err) = errors.recv() => {
                tracing::debug!(target_host = %err.target, "probe failed");
            }
            done = &mut finished => {
                done?;
                break;
            }
        }
    }
    while let Ok(res) = results.try_recv() {
        response_time_sum.fetch_add(res.response_time_ms, Ordering::Relaxed);
        data_size_sum.fetch_add(res.data_size, Ordering::Relaxed);
    }
    monitor_token.cancel();

    let metrics = queue.metrics();
    let ok = metrics.succeeded.max(1) as u64;
    println!("Workers: {}", metrics.pool.total_workers);
    println!("Created jobs: {}", metrics.submitted);
    println!("Succeeded jobs: {}", metrics.succeeded);
    println!("Errored jobs: {}", metrics.failed);
    println!("Response time average: {}ms", response_time_sum.load(Ordering::Relaxed) / ok);
    println!("Data size average: {} bytes", data_size_sum.load(Ordering::Relaxed) / ok);

    queue.cancel();
    pool.shutdown().await;
    println!("elapsed: {:?}", now.elapsed());
    Ok(())
}
