//! Several workers contending for the same resources.
//!
//! Runs against the in-memory lease table. With `--features postgres` and
//! `DATABASE_URL` set, the workers share a PostgreSQL table instead.
//!
//! ```text
//! RUST_LOG=leasehold=debug cargo run --example contended_workers
//! ```

use std::sync::Arc;
use std::time::Duration;

use leasehold::*;
use tracing_subscriber::EnvFilter;

async fn open_store(config: &LockConfig) -> anyhow::Result<Arc<dyn LeaseStore>> {
    #[cfg(feature = "postgres")]
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let store = PostgresLeaseStore::connect(&PersistenceConfig::new(url), config).await?;
        println!("[MAIN] Using lease table {}", store.table());
        return Ok(Arc::new(store));
    }

    let _ = config;
    println!("[MAIN] Using in-memory lease table");
    Ok(Arc::new(InMemoryLeaseStore::new()))
}

async fn worker(id: usize, lock: LeaseLock, cancel: CancellationSignal) -> Result<(), LockError> {
    for round in 0..3 {
        let mut lease = lock
            .acquire("queue:default", Duration::from_secs(2), &cancel)
            .await?;
        println!("[WORKER {id}] round {round}: holding {}", lease.resource());
        tokio::time::sleep(Duration::from_millis(150)).await;
        lease.release().await?;
    }

    let mut set = lock
        .acquire_many(
            [
                ResourceKey::new(ResourceKind::Queue, "queue:default"),
                ResourceKey::new(ResourceKind::Job, format!("job:{id}")),
                ResourceKey::new(ResourceKind::Counter, "stats:succeeded"),
            ],
            Duration::from_secs(5),
            &cancel,
        )
        .await?;
    println!("[WORKER {id}] holding batch {:?}", set.resources());
    tokio::time::sleep(Duration::from_millis(50)).await;
    set.release().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let config = LockConfig::default().with_poll_interval(50);
    let store = open_store(&config).await?;
    let lock = LeaseLock::new(store, config)?;
    let cancel = CancellationSignal::new();

    let mut workers = Vec::new();
    for id in 0..4 {
        workers.push(tokio::spawn(worker(id, lock.clone(), cancel.clone())));
    }

    let straggler = {
        let lock = lock.clone();
        let cancel = CancellationSignal::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            stop.cancel();
        });
        tokio::spawn(async move {
            let _held = lock
                .acquire("queue:default", Duration::from_secs(10), &cancel)
                .await?;
            Ok::<_, LockError>(())
        })
    };

    for (id, handle) in workers.into_iter().enumerate() {
        match handle.await? {
            Ok(()) => println!("[WORKER {id}] done"),
            Err(err) => println!("[WORKER {id}] failed: {err}"),
        }
    }
    match straggler.await? {
        Ok(()) => println!("[STRAGGLER] got the lease"),
        Err(err) => println!("[STRAGGLER] gave up: {err}"),
    }

    #[cfg(feature = "metrics")]
    {
        leasehold::metrics::init_metrics()?;
        println!("{}", leasehold::metrics::gather_metrics()?);
    }

    cancel.cancel();
    Ok(())
}
