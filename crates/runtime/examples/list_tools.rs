//! Connect one stdio tool provider and print its registry.
//!
//! Run with: cargo run --example list_tools -- <id> <command> [args...]

use runtime::{NameOverrides, ProviderConfig, SessionManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(id), Some(command)) = (args.next(), args.next()) else {
        eprintln!("usage: list_tools <id> <command> [args...]");
        std::process::exit(2);
    };

    let config = ProviderConfig::new(id, command).with_args(args);
    println!("Connecting {} ({} {:?})", config.id, config.command, config.args);

    let manager = SessionManager::connect_all(&[config], &NameOverrides::new()).await?;

    println!("\nDiscovered {} tools:", manager.len());
    for capability in manager.capabilities() {
        println!("  - {}", capability.exposed_name);
        if !capability.description.is_empty() {
            println!("    {}", capability.description);
        }
    }

    manager.disconnect_all().await;
    Ok(())
}
