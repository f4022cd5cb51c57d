use closer_pool::{Closer, ResourcePool};
use rand::Rng;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_QUERIES: usize = 25;
const POOLED_RESOURCES: usize = 2;

// Simulates a shared database connection.
struct DbConnection {
  id: u32,
}

impl Closer for DbConnection {
  type Error = Infallible;

  fn close(self) -> Result<(), Self::Error> {
    info!("Close: connection {}", self.id);
    Ok(())
  }
}

async fn perform_query(query: usize, pool: Arc<ResourcePool<DbConnection, Infallible>>) {
  let conn = match pool.acquire() {
    Ok(conn) => conn,
    Err(e) => {
      tracing::error!("Query {} could not acquire a connection: {}", query, e);
      return;
    }
  };

  let hold_ms = rand::rng().random_range(0..1000u64);
  tokio::time::sleep(Duration::from_millis(hold_ms)).await;
  info!("QID[{}] CID[{}]", query, conn.id);

  pool.release(conn);
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Pooled Queries Example ---");

  let next_id = Arc::new(AtomicU32::new(0));
  let pool = ResourcePool::new("db_connections", POOLED_RESOURCES, move || {
    let id = next_id.fetch_add(1, Ordering::Relaxed) + 1;
    info!("Create: new connection {}", id);
    Ok::<_, Infallible>(DbConnection { id })
  })
  .expect("Pool capacity is non-zero");

  let handles: Vec<_> = (0..MAX_QUERIES)
    .map(|query| tokio::spawn(perform_query(query, pool.clone())))
    .collect();
  for handle in handles {
    handle.await.expect("Query task panicked");
  }

  info!("All queries finished. Idle connections: {}", pool.idle_count());
  pool.close();
  info!("--- Pooled Queries Example End ---");
}
