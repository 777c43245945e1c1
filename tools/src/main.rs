//! clv-runner: headless pipeline runner and dashboard backend.
//!
//! Usage:
//!   clv-runner --input transactions.csv [--config clv.json] [--db run.db]
//!   clv-runner --demo --seed 42
//!   clv-runner --input transactions.csv --ipc-mode
//!
//! Report mode prints the aggregate summary, segment breakdown, top
//! customers, and the fit diagnostic. IPC mode serves the same views as
//! newline-delimited JSON over stdin/stdout for a dashboard front end.

use anyhow::Result;
use clv_core::{
    demo::DemoDataset,
    engine::ClvEngine,
    store::ClvStore,
    EngineConfig,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Summary,
    Customer { customer_id: String },
    Diagnostics,
    Top { count: usize },
    Recompute { horizon_months: Option<u32> },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let input = arg_value(&args, "--input");
    let config_path = arg_value(&args, "--config");
    let db = arg_value(&args, "--db");
    let demo_mode = args.iter().any(|a| a == "--demo");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let seed = parse_arg(&args, "--seed", 42u64);
    let top_n = parse_arg(&args, "--top", 10usize);

    let config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = match db {
        Some(path) => {
            let store = ClvStore::open(path)?;
            store.migrate()?;
            store
        }
        None => {
            let store = ClvStore::in_memory()?;
            store.migrate()?;
            store
        }
    };

    let run_id = clv_core::types::new_run_id();
    let mut engine = ClvEngine::build(run_id.clone(), config, store)?;

    let loaded = if demo_mode {
        let transactions = DemoDataset::default().generate(seed);
        engine.load_transactions(&format!("demo(seed={seed})"), transactions)?
    } else {
        let path = input.ok_or_else(|| {
            anyhow::anyhow!("either --input <csv> or --demo is required")
        })?;
        engine.load_csv(path)?
    };

    if !ipc_mode {
        println!("clv-runner");
        println!("  run_id:       {run_id}");
        println!("  transactions: {loaded}");
        println!();
    }

    let report = engine.recompute()?;

    if ipc_mode {
        run_ipc_loop(&mut engine)?;
    } else {
        print_report(&engine, &report, top_n)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &mut ClvEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                reply_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };

        let outcome = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Summary => engine.summary().and_then(|s| Ok(serde_json::to_value(s)?)),
            IpcCommand::Customer { customer_id } => engine
                .customer(&customer_id)
                .and_then(|v| Ok(serde_json::to_value(v)?)),
            IpcCommand::Diagnostics => engine
                .diagnostics()
                .and_then(|d| Ok(serde_json::to_value(d)?)),
            IpcCommand::Top { count } => engine
                .top_customers(count)
                .and_then(|t| Ok(serde_json::to_value(t)?)),
            IpcCommand::Recompute { horizon_months } => engine
                .recompute_with_horizon(horizon_months)
                .and_then(|r| Ok(serde_json::to_value(r)?)),
        };

        match outcome {
            Ok(value) => writeln!(stdout, "{value}")?,
            Err(e) => reply_error(&mut stdout, &e.to_string())?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn reply_error(stdout: &mut io::Stdout, message: &str) -> Result<()> {
    let err_json = serde_json::json!({ "error": message });
    writeln!(stdout, "{err_json}")?;
    stdout.flush()?;
    Ok(())
}

fn print_report(
    engine: &ClvEngine,
    report: &clv_core::engine::PipelineReport,
    top_n: usize,
) -> Result<()> {
    let summary = engine.summary()?;

    println!("=== PIPELINE ===");
    println!("  customers:        {}", report.n_customers);
    println!("  repeat customers: {}", report.n_repeat_customers);
    println!("  observation end:  {}", report.observation_end);
    println!(
        "  bg/nbd:           r={:.4} alpha={:.4} a={:.4} b={:.4}",
        report.timing_params.r, report.timing_params.alpha,
        report.timing_params.a, report.timing_params.b,
    );
    println!(
        "  gamma-gamma:      p={:.4} q={:.4} v={:.4}",
        report.spend_params.p, report.spend_params.q, report.spend_params.v,
    );

    println!();
    println!(
        "=== {}-MONTH CLV SUMMARY ===",
        engine.config().policy.horizon_months
    );
    println!("  total:  ${:.2}", summary.total_clv);
    println!("  mean:   ${:.2}", summary.mean_clv);
    println!("  median: ${:.2}", summary.median_clv);
    println!("  max:    ${:.2}", summary.max_clv);
    println!(
        "  segments: high_value={} nurture={} low_priority={}",
        summary.segments.high_value, summary.segments.nurture, summary.segments.low_priority,
    );
    println!(
        "  cut-offs: high_value>${:.2} nurture>${:.2}",
        summary.cutoffs.high_value, summary.cutoffs.nurture,
    );

    println!();
    println!("=== TOP {top_n} CUSTOMERS ===");
    for est in engine.top_customers(top_n)? {
        println!(
            "  {:<12} clv=${:<10.2} p_alive={:.2} txns={:.2} avg=${:.2} [{}]",
            est.customer_id,
            est.predicted_clv,
            est.p_alive,
            est.expected_purchases,
            est.expected_txn_value,
            est.segment.as_str(),
        );
    }

    println!();
    println!("=== FIT: REPEAT TRANSACTIONS (observed vs predicted) ===");
    for bin in engine.diagnostics()?.bins {
        let label = if bin.overflow {
            format!("{}+", bin.repeat_purchases)
        } else {
            bin.repeat_purchases.to_string()
        };
        println!("  {label:>3}  observed={:<6} predicted={:.1}", bin.observed, bin.predicted);
    }

    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
