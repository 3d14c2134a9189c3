use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tandem::prelude::*;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Adds `params[0]` to the submitting company's total.
const CMD_ADD: u16 = 1;

/// Per-company running totals. Deterministic: iteration order is fixed by
/// the `BTreeMap`, and nothing reads the wall clock.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    totals: BTreeMap<u8, i64>,
    frame: u32,
}

impl Simulation for Ledger {
    fn apply_command(&mut self, command: &CommandPacket) {
        let amount = command.params.first().copied().unwrap_or(0);
        *self.totals.entry(command.company.0).or_default() += i64::from(amount);
    }

    fn step(&mut self) {
        self.frame += 1;
    }

    fn checksum(&self) -> Checksum {
        let digest = self.totals.iter().fold(0u32, |acc, (company, total)| {
            acc.rotate_left(5) ^ u32::from(*company) ^ (*total as u32)
        });
        Checksum(digest, self.frame)
    }

    fn save_snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            error!(error = %e, "ledger could not be serialized");
            Vec::new()
        })
    }

    fn load_snapshot(&mut self, data: &[u8]) -> Result<(), String> {
        *self = serde_json::from_slice(data).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn validate_command(&self, _origin: ClientId, command: &CommandPacket) -> Result<(), String> {
        if command.cmd != CMD_ADD {
            return Err(format!("unknown command {}", command.cmd));
        }
        Ok(())
    }

    fn emergency_save(&mut self) {
        info!(frame = self.frame, totals = ?self.totals, "connection lost, final ledger");
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "counter-sim", version, about = "Lockstep ledger over tandem")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Host a session.
    Host {
        #[arg(default_value = "127.0.0.1:3979")]
        addr: String,
    },
    /// Join a running session.
    Join {
        addr: String,
        /// Player name; defaults to guest-<pid>.
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        company: u8,
    },
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
    }
}

fn auth_policy() -> AuthPolicy {
    match std::env::var("TANDEM_PASSWORD") {
        Ok(password) => AuthPolicy::Password { password },
        Err(_) => AuthPolicy::default(),
    }
}

async fn run_host(addr: &str, config: NetworkConfig) -> Result<(), TandemError> {
    let host = Host::new(config, auth_policy(), Ledger::default(), Vec::<ContentEntry>::new());
    let server = HostServer::bind(addr, host).await?;
    info!(addr = %server.local_addr()?, "hosting");

    let host = server
        .run(ctrl_c(), |host, events| {
            for event in events {
                info!(?event, "host event");
            }
            if host.frame() % 90 == 0 {
                let command = CommandPacket::new(CompanyId(0), CMD_ADD, vec![1]);
                if let Err(e) = host.submit(command) {
                    error!(error = %e, "host command refused");
                }
            }
        })
        .await?;
    info!(frame = host.frame(), totals = ?host.simulation().totals, "host finished");
    Ok(())
}

async fn run_join(
    addr: &str,
    config: NetworkConfig,
    company: CompanyId,
) -> Result<(), TandemError> {
    let credentials = match std::env::var("TANDEM_PASSWORD") {
        Ok(password) => Credentials::password(password),
        Err(_) => Credentials::default(),
    };
    let participant = Participant::new(
        config,
        credentials,
        company,
        Ledger::default(),
        Vec::<ContentEntry>::new(),
    );
    let client = ParticipantClient::connect(addr, &NoRendezvous, participant).await?;

    let (participant, status) = client
        .run(ctrl_c(), |participant, events| {
            for event in events {
                info!(?event, "participant event");
            }
            if participant.state() == ConnectionState::Active && participant.frame() % 60 == 0 {
                let command = CommandPacket::new(company, CMD_ADD, vec![2]);
                if let Err(e) = participant.submit(command) {
                    error!(error = %e, "command not sent");
                }
            }
        })
        .await?;
    info!(
        %status,
        frame = participant.frame(),
        totals = ?participant.simulation().totals,
        "left the session"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");

    let config = match std::env::var("TANDEM_CONFIG") {
        Ok(path) => NetworkConfig::load(path)?,
        Err(_) => NetworkConfig::default(),
    };

    let command = Cli::parse().command.unwrap_or(Command::Host {
        addr: "127.0.0.1:3979".into(),
    });
    match command {
        Command::Host { addr } => run_host(&addr, config).await?,
        Command::Join {
            addr,
            name,
            company,
        } => {
            let player_name = name.unwrap_or_else(|| format!("guest-{}", std::process::id()));
            let config = NetworkConfig {
                player_name,
                ..config
            };
            run_join(&addr, config, CompanyId(company)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(company: u8, amount: u8) -> CommandPacket {
        CommandPacket::new(CompanyId(company), CMD_ADD, vec![amount])
    }

    #[test]
    fn test_ledger_snapshot_restores_checksum() {
        let mut ledger = Ledger::default();
        ledger.apply_command(&add(1, 5));
        ledger.apply_command(&add(2, 3));
        ledger.step();

        let mut copy = Ledger::default();
        copy.load_snapshot(&ledger.save_snapshot()).unwrap();
        assert_eq!(copy.checksum(), ledger.checksum());
    }

    #[test]
    fn test_ledger_rejects_unknown_command() {
        let ledger = Ledger::default();
        let command = CommandPacket::new(CompanyId(1), 77, Vec::new());
        assert!(ledger.validate_command(ClientId(2), &command).is_err());
        assert!(ledger.validate_command(ClientId(2), &add(1, 1)).is_ok());
    }

    #[test]
    fn test_cli_join_parses_name_and_company() {
        let cli = Cli::try_parse_from([
            "counter-sim",
            "join",
            "10.0.0.2:3979",
            "--name",
            "bob",
            "--company",
            "4",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Join {
                addr: "10.0.0.2:3979".into(),
                name: Some("bob".into()),
                company: 4,
            })
        );
    }

    #[test]
    fn test_cli_host_defaults_address() {
        let cli = Cli::try_parse_from(["counter-sim", "host"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Host {
                addr: "127.0.0.1:3979".into()
            })
        );
        assert!(Cli::try_parse_from(["counter-sim"]).unwrap().command.is_none());
    }

    #[test]
    fn test_cli_rejects_join_without_address() {
        assert!(Cli::try_parse_from(["counter-sim", "join"]).is_err());
        assert!(Cli::try_parse_from(["counter-sim", "join", "a:1", "--company", "300"]).is_err());
    }

    #[test]
    fn test_ledger_checksum_tracks_totals() {
        let mut a = Ledger::default();
        let mut b = Ledger::default();
        a.apply_command(&add(1, 5));
        b.apply_command(&add(1, 6));
        assert_ne!(a.checksum(), b.checksum());
    }
}
