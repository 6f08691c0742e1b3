//! Test Event Producer
//!
//! Generates transaction events and publishes them to the partition subjects
//! `{subject_prefix}.{partition}` for pipeline testing. A share of the output
//! is deliberately redelivered or malformed to exercise duplicate
//! suppression and decode rejection.
//!
//! Usage: test_producer [nats_url] [subject_prefix] [count] [fraud_rate]
//!        [delay_ms] [partitions] [duplicate_rate] [malformed_rate] [--dry-run]

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// What a generated payload is meant to exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Legitimate,
    Suspicious,
    Duplicate,
    Malformed,
}

/// Event generator for testing
struct EventGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
    partitions: u32,
    /// Recently published (partition, payload) pairs for redelivery
    recent: Vec<(String, Vec<u8>)>,
}

impl EventGenerator {
    fn new(partitions: u32) -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
            partitions: partitions.max(1),
            recent: Vec::new(),
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("tx_{:012}", self.counter)
    }

    /// Partition chosen from the transaction id so redeliveries land on the same partition
    fn partition_for(&self, transaction_id: &str) -> String {
        let hash = transaction_id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        (hash % self.partitions).to_string()
    }

    /// Generate a random legitimate transaction
    fn generate_legitimate(&mut self) -> Value {
        let transaction_id = self.next_id();
        json!({
            "transaction_id": transaction_id,
            "amount": (self.rng.gen_range(10.0..500.0_f64) * 100.0).round() / 100.0,
            "timestamp": Utc::now().to_rfc3339(),
            "user_id": format!("user_{}", self.rng.gen_range(1..5000)),
            "currency": self.random_choice(&["USD", "EUR", "GBP", "CAD"]),
            "merchant_id": format!("merchant_{}", self.rng.gen_range(1..1000)),
            "is_online": self.rng.gen_bool(0.6),
        })
    }

    /// Generate a suspicious transaction: high amount at night
    fn generate_suspicious(&mut self) -> Value {
        let transaction_id = self.next_id();
        let day = Utc::now() - ChronoDuration::days(self.rng.gen_range(0..7));
        let timestamp = format!(
            "{}T{:02}:{:02}:{:02}Z",
            day.format("%Y-%m-%d"),
            self.rng.gen_range(0..6),
            self.rng.gen_range(0..60),
            self.rng.gen_range(0..60)
        );
        json!({
            "transaction_id": transaction_id,
            // High amounts, sometimes sent as strings
            "amount": if self.rng.gen_bool(0.3) {
                Value::String(format!("{:.2}", self.rng.gen_range(1000.0..10000.0_f64)))
            } else {
                json!((self.rng.gen_range(1000.0..10000.0_f64) * 100.0).round() / 100.0)
            },
            "timestamp": timestamp,
            "user_id": format!("user_{}", self.rng.gen_range(1..50)),
            "currency": self.random_choice(&["USD", "EUR"]),
            "merchant_id": format!("merchant_{}", self.rng.gen_range(1..1000)),
            "is_online": true,
        })
    }

    /// Generate a payload the codec must reject
    fn generate_malformed(&mut self) -> Vec<u8> {
        let transaction_id = self.next_id();
        let payload = match self.rng.gen_range(0..4) {
            0 => json!({ "transaction_id": transaction_id, "timestamp": Utc::now().to_rfc3339() }),
            1 => json!({ "transaction_id": transaction_id, "amount": -12.5, "timestamp": Utc::now().to_rfc3339() }),
            2 => json!({ "transaction_id": transaction_id, "amount": 10.0, "timestamp": "yesterday" }),
            _ => return b"{not json".to_vec(),
        };
        payload.to_string().into_bytes()
    }

    /// Produce the next (kind, partition, payload)
    fn next(&mut self, fraud_rate: f64, duplicate_rate: f64, malformed_rate: f64) -> (PayloadKind, String, Vec<u8>) {
        if !self.recent.is_empty() && self.rng.gen_bool(duplicate_rate) {
            let index = self.rng.gen_range(0..self.recent.len());
            let (partition, payload) = self.recent[index].clone();
            return (PayloadKind::Duplicate, partition, payload);
        }

        if self.rng.gen_bool(malformed_rate) {
            let partition = self.rng.gen_range(0..self.partitions).to_string();
            return (PayloadKind::Malformed, partition, self.generate_malformed());
        }

        let (kind, event) = if self.rng.gen_bool(fraud_rate) {
            (PayloadKind::Suspicious, self.generate_suspicious())
        } else {
            (PayloadKind::Legitimate, self.generate_legitimate())
        };

        let transaction_id = event["transaction_id"].as_str().unwrap_or_default().to_string();
        let partition = self.partition_for(&transaction_id);
        let payload = event.to_string().into_bytes();

        self.recent.push((partition.clone(), payload.clone()));
        if self.recent.len() > 100 {
            self.recent.remove(0);
        }

        (kind, partition, payload)
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[derive(Debug, Default)]
struct Tally {
    legitimate: u64,
    suspicious: u64,
    duplicate: u64,
    malformed: u64,
}

impl Tally {
    fn add(&mut self, kind: PayloadKind) {
        match kind {
            PayloadKind::Legitimate => self.legitimate += 1,
            PayloadKind::Suspicious => self.suspicious += 1,
            PayloadKind::Duplicate => self.duplicate += 1,
            PayloadKind::Malformed => self.malformed += 1,
        }
    }
}

struct Args {
    nats_url: String,
    subject_prefix: String,
    count: u64,
    fraud_rate: f64,
    delay_ms: u64,
    partitions: u32,
    duplicate_rate: f64,
    malformed_rate: f64,
    dry_run: bool,
}

impl Args {
    fn parse() -> Self {
        let mut raw: Vec<String> = std::env::args().skip(1).collect();
        let dry_run = raw.iter().any(|a| a == "--dry-run");
        raw.retain(|a| a != "--dry-run");

        let rate = |value: Option<&String>, default: f64| {
            value
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(default)
                .clamp(0.0, 1.0)
        };

        Self {
            nats_url: raw.first().cloned().unwrap_or_else(|| "nats://localhost:4222".to_string()),
            subject_prefix: raw.get(1).cloned().unwrap_or_else(|| "transactions".to_string()),
            count: raw.get(2).and_then(|s| s.parse().ok()).unwrap_or(100),
            fraud_rate: rate(raw.get(3), 0.1),
            delay_ms: raw.get(4).and_then(|s| s.parse().ok()).unwrap_or(100),
            partitions: raw.get(5).and_then(|s| s.parse().ok()).unwrap_or(2),
            duplicate_rate: rate(raw.get(6), 0.05),
            malformed_rate: rate(raw.get(7), 0.02),
            dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Event Producer");

    let args = Args::parse();
    info!(
        nats_url = %args.nats_url,
        subject_prefix = %args.subject_prefix,
        count = args.count,
        fraud_rate = args.fraud_rate,
        delay_ms = args.delay_ms,
        partitions = args.partitions,
        duplicate_rate = args.duplicate_rate,
        malformed_rate = args.malformed_rate,
        "Configuration loaded"
    );

    if args.dry_run {
        return run_dry_mode(&args).await;
    }

    let client = match async_nats::connect(&args.nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&args).await;
        }
    };

    let mut generator = EventGenerator::new(args.partitions);
    let mut tally = Tally::default();

    info!("Starting to publish {} events...", args.count);

    for i in 0..args.count {
        let (kind, partition, payload) =
            generator.next(args.fraud_rate, args.duplicate_rate, args.malformed_rate);
        tally.add(kind);

        let subject = format!("{}.{}", args.subject_prefix, partition);
        client.publish(subject, payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(published = i + 1, total = args.count, tally = ?tally, "Progress");
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    client.flush().await?;
    info!(published = args.count, tally = ?tally, "Completed");

    Ok(())
}

async fn run_dry_mode(args: &Args) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = EventGenerator::new(args.partitions);
    let mut tally = Tally::default();

    for i in 0..args.count {
        let (kind, partition, payload) =
            generator.next(args.fraud_rate, args.duplicate_rate, args.malformed_rate);
        tally.add(kind);

        if (i + 1) % 10 == 0 || i == 0 {
            info!(
                "Sample event {} ({:?}) for {}.{}:\n{}",
                i + 1,
                kind,
                args.subject_prefix,
                partition,
                String::from_utf8_lossy(&payload)
            );
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    info!(generated = args.count, tally = ?tally, "Dry run finished");
    Ok(())
}
