//! plate_list - print the plates recorded by plate_sentryd

use anyhow::{anyhow, Result};
use clap::Parser;

use plate_sentry::{PlateStore, PlateText, SqlitePlateStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the plate database.
    #[arg(long, env = "PLATE_SENTRY_DB_PATH", default_value = "license_plates.db")]
    db_path: String,
    /// Maximum plates to print, oldest first.
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Only report whether this plate has been recorded (exit code 1 if not).
    #[arg(long, value_name = "PLATE")]
    check: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let store = SqlitePlateStore::open(&args.db_path)?;

    if let Some(raw) = args.check.as_deref() {
        let plate = PlateText::normalize(raw)
            .ok_or_else(|| anyhow!("--check needs a non-empty plate"))?;
        let record = store.get(&plate)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            match &record {
                Some(record) => println!(
                    "{} first seen {} (confidence {:.2})",
                    record.plate_text,
                    record.first_seen.format(plate_sentry::plate::TIMESTAMP_FORMAT),
                    record.confidence
                ),
                None => println!("{} not recorded", plate),
            }
        }
        if record.is_none() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let records = store.list(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{:<12} {:<19} {:>10}", "PLATE", "FIRST SEEN", "CONFIDENCE");
    for record in &records {
        println!(
            "{:<12} {:<19} {:>10.2}",
            record.plate_text.as_str(),
            record
                .first_seen
                .format(plate_sentry::plate::TIMESTAMP_FORMAT)
                .to_string(),
            record.confidence
        );
    }
    println!("{} of {} plates", records.len(), store.count()?);
    Ok(())
}
