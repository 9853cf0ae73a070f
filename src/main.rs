//! Gray-Scott CLI - Run the engine from JSON configuration.

use std::path::PathBuf;
use std::time::Instant;

use grayscott::{Engine, EngineConfig, FieldStats};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [steps]", args[0]);
        eprintln!();
        eprintln!("Run a Gray-Scott simulation from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to engine configuration file");
        eprintln!("  steps        Number of simulation steps (default: 1000)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let steps: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1000);

    let config = EngineConfig::from_json_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    println!("Gray-Scott Simulation");
    println!("=====================");
    println!("Grid: {}x{}", config.width, config.height);
    println!(
        "Feed: {}, kill: {}, dt: {}",
        config.params.feed, config.params.kill, config.params.dt
    );
    println!("Steps: {}", steps);
    println!();

    let mut engine = Engine::init(config).unwrap_or_else(|e| {
        eprintln!("Error starting engine: {}", e);
        std::process::exit(1);
    });

    match engine.active_tier() {
        Some(tier) => println!("Backend: {:?}", tier),
        None => println!("Backend: none ({})", engine.state()),
    }
    for fallback in engine.fallback_history() {
        println!("  fell back: {}", fallback);
    }
    if (engine.width(), engine.height()) != (engine.config().width, engine.config().height) {
        println!("  grid reduced to {}x{}", engine.width(), engine.height());
    }
    println!();

    let initial_stats = stats_or_exit(&mut engine);
    println!("Initial state:");
    print_stats(&initial_stats);
    println!();

    println!("Running simulation...");
    let start = Instant::now();
    let chunk = (steps / 10).max(1);
    let mut done = 0;

    while done < steps {
        let count = chunk.min(steps - done);
        if let Err(e) = engine.step(count) {
            eprintln!("Error stepping: {}", e);
            std::process::exit(1);
        }
        done += count;

        let stats = stats_or_exit(&mut engine);
        let elapsed = start.elapsed().as_secs_f32();
        println!(
            "  Step {}/{}: mean_v={:.6}, active={}, {:.1} steps/s [{}]",
            done,
            steps,
            stats.mean_v,
            stats.active_cells,
            done as f32 / elapsed,
            engine.state()
        );
    }

    let elapsed = start.elapsed();
    let final_stats = stats_or_exit(&mut engine);

    println!();
    println!("Final state:");
    print_stats(&final_stats);
    println!();
    println!(
        "Time: {:.2}s ({:.1} steps/s)",
        elapsed.as_secs_f32(),
        steps as f32 / elapsed.as_secs_f32()
    );

    engine.release();
}

fn stats_or_exit(engine: &mut Engine) -> FieldStats {
    engine.stats().unwrap_or_else(|e| {
        eprintln!("Error reading field: {}", e);
        std::process::exit(1);
    })
}

fn print_stats(stats: &FieldStats) {
    println!("  Mean U/V: {:.6} / {:.6}", stats.mean_u, stats.mean_v);
    println!("  Active cells: {}", stats.active_cells);
    println!(
        "  U range: [{:.6}, {:.6}], V range: [{:.6}, {:.6}]",
        stats.min_u, stats.max_u, stats.min_v, stats.max_v
    );
}

fn print_example_config() {
    let config = EngineConfig {
        rng_seed: Some(42),
        ..Default::default()
    };

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
