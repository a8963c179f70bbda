//! Connection pooling with metrics example.
//!
//! Demonstrates the pool lifecycle against a simulated transport: warm-up
//! to the minimum, concurrent checkouts, a fault-driven clear, and the
//! metrics surface.
//!
//! # Running
//!
//! ```bash
//! cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use docstore_driver_pool::{
    ConnectionError, Connector, Pool, PoolState, ServerAddress, Transport,
};
use tokio::time::Instant;

/// Simulated established session.
#[derive(Debug)]
struct DemoTransport;

impl Transport for DemoTransport {
    fn shutdown(&mut self) {}
}

/// Connector that "establishes" after a short simulated handshake.
struct DemoConnector;

#[async_trait::async_trait]
impl Connector for DemoConnector {
    async fn connect(
        &self,
        _address: &ServerAddress,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Box::new(DemoTransport))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Connection Pool with Metrics Example ===\n");

    let pool = Pool::builder()
        .address(ServerAddress::new("localhost", 7070))
        .connector(Arc::new(DemoConnector))
        .min_pool_size(2)
        .max_pool_size(10)
        .wait_queue_timeout(Duration::from_secs(5))
        .maintenance_interval(Duration::from_millis(100))
        .build()?;

    // The server monitor signals readiness; the maintainer then warms the
    // pool toward the minimum.
    pool.ready();
    tokio::time::sleep(Duration::from_millis(300)).await;
    print_pool_status(&pool);

    println!("\n1. Basic checkout:");
    {
        let conn = pool.check_out().await?;
        println!(
            "  checked out connection {} (generation {})",
            conn.id(),
            conn.generation()
        );
        // Checked back in when the guard drops.
    }

    println!("\n2. Concurrent checkouts (20 parallel holders):");
    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..20 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.check_out().await?;
            // Simulate some work on the session.
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(conn);
            Ok::<_, docstore_driver_pool::Error>(())
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  completed {completed} checkouts in {:?}", start.elapsed());
    print_pool_status(&pool);
    print_pool_metrics(&pool);

    println!("\n3. Fault handling:");
    pool.clear(ConnectionError::Reset, false);
    println!("  cleared after a reported fault, state: {:?}", pool.state());
    pool.ready();
    let conn = pool.check_out().await?;
    println!("  next checkout runs on generation {}", conn.generation());
    drop(conn);

    println!("\n4. Shutdown:");
    pool.close();
    assert_eq!(pool.state(), PoolState::Closed);
    match pool.check_out().await {
        Err(err) => println!("  checkout after close: {err}"),
        Ok(_) => unreachable!(),
    }
    print_pool_metrics(&pool);

    Ok(())
}

fn print_pool_status(pool: &Pool) {
    let status = pool.status();
    println!(
        "  status: {} idle, {} in use, {} pending of max {} (generation {})",
        status.idle, status.in_use, status.pending, status.max, status.generation
    );
}

fn print_pool_metrics(pool: &Pool) {
    let metrics = pool.metrics();
    println!("  metrics:");
    println!("    connections created: {}", metrics.connections_created);
    println!("    connections closed: {}", metrics.connections_closed);
    println!(
        "    checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
}
