//! Command-line arguments.

use clap::{Parser, Subcommand};
use vanity_core::MiningPayload;
use vanity_jobs::{EnqueueOptions, Priority};

/// Enqueue and inspect vanity salt mining jobs.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the layered configuration files.
    #[arg(long, value_name = "DIR", default_value = "./config", env = "VANITY_CONFIG_DIR")]
    pub config_dir: String,

    /// Log queue operations to stderr.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a mining job and print its id.
    Enqueue(EnqueueArgs),
    /// Print a job record as JSON.
    Status {
        /// Job id returned by `enqueue`.
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
    /// Print queue counts as JSON.
    Stats,
}

#[derive(Debug, clap::Args)]
pub struct EnqueueArgs {
    /// Deployer address (0x + 40 hex digits).
    #[arg(long, value_name = "ADDRESS")]
    pub deployer: String,

    /// Init code hash (0x + 64 hex digits).
    #[arg(long, value_name = "HASH")]
    pub init_code_hash: String,

    /// Caller-chosen token identifier.
    #[arg(long, value_name = "ID")]
    pub token_id: String,

    /// Minimum number of leading vanity bytes.
    #[arg(long, value_name = "N")]
    pub min_leading_bs: Option<u32>,

    /// Broker timeout for this job in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Scheduling priority: low, normal, high or critical.
    #[arg(long, default_value = "normal")]
    pub priority: Priority,
}

impl EnqueueArgs {
    /// The job payload.
    pub fn payload(&self) -> MiningPayload {
        let payload = MiningPayload::new(&self.deployer, &self.init_code_hash, &self.token_id);
        match self.min_leading_bs {
            Some(n) => payload.with_min_leading_bs(n),
            None => payload,
        }
    }

    /// Enqueue options.
    pub fn options(&self) -> EnqueueOptions {
        let options = EnqueueOptions::default().priority(self.priority);
        match self.timeout_ms {
            Some(timeout_ms) => options.timeout_ms(timeout_ms),
            None => options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const DEPLOYER: &str = "0x000000000000000000000000000000000000dEaD";

    fn hash() -> String {
        format!("0x{}", "11".repeat(32))
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let hash = hash();
        let cli = Cli::try_parse_from([
            "vanity-producer",
            "enqueue",
            "--deployer",
            DEPLOYER,
            "--init-code-hash",
            &hash,
            "--token-id",
            "t1",
            "--min-leading-bs",
            "10",
            "--timeout-ms",
            "60000",
            "--priority",
            "high",
        ])
        .unwrap();

        let Command::Enqueue(args) = cli.command else {
            panic!("expected enqueue");
        };
        let payload = args.payload();
        assert_eq!(payload.deployer_address, DEPLOYER);
        assert_eq!(payload.init_code_hash, hash);
        assert_eq!(payload.token_id, "t1");
        assert_eq!(payload.min_leading_bs, Some(10));

        let options = args.options();
        assert_eq!(options.timeout_ms, Some(60_000));
        assert_eq!(options.priority, Priority::High);
    }

    #[test]
    fn test_enqueue_defaults() {
        let hash = hash();
        let cli = Cli::try_parse_from([
            "vanity-producer",
            "enqueue",
            "--deployer",
            DEPLOYER,
            "--init-code-hash",
            &hash,
            "--token-id",
            "t1",
        ])
        .unwrap();

        assert_eq!(cli.config_dir, "./config");
        let Command::Enqueue(args) = cli.command else {
            panic!("expected enqueue");
        };
        assert_eq!(args.payload().min_leading_bs, None);
        assert_eq!(args.options().priority, Priority::Normal);
        assert_eq!(args.options().timeout_ms, None);
    }

    #[test]
    fn test_rejects_unknown_priority() {
        let hash = hash();
        let result = Cli::try_parse_from([
            "vanity-producer",
            "enqueue",
            "--deployer",
            DEPLOYER,
            "--init-code-hash",
            &hash,
            "--token-id",
            "t1",
            "--priority",
            "urgent",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["vanity-producer", "status", "0191-abc"]).unwrap();
        assert!(matches!(cli.command, Command::Status { ref job_id } if job_id == "0191-abc"));
    }
}
