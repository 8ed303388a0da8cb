use stress_test::{
    stress_test_archive, stress_test_deep_alt_branch, stress_test_fan_in, stress_test_honest_chain,
};
use tracing_subscriber::{fmt, EnvFilter};
pub mod stress_test;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            MAIN CHAIN STABILITY STRESS TESTS               ║");
    println!("║            {:<48}║", chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: honest witnesses, small scale
    let stats = stress_test_honest_chain(500, 0.0).await?;
    stats.print();

    // Test 2: honest witnesses with observer traffic
    let stats = stress_test_honest_chain(2_000, 0.3).await?;
    stats.print();

    // Test 3: wide fan-in at identical levels
    let stats = stress_test_fan_in(100, 12).await?;
    stats.print();

    // Test 4: adversarial deep branch
    let stats = stress_test_deep_alt_branch(200, 2_000).await?;
    stats.print();

    // Test 5: bounded archiving under write load
    let stats = stress_test_archive(1_000, 32).await?;
    stats.print();

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
