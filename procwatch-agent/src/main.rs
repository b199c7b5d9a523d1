mod app;

use anyhow::{bail, Context, Result};
use app::App;
use procwatch_core::{parse_pid, Config};
use std::path::PathBuf;

const USAGE: &str = "usage: procwatch-agent [--config PATH] [kill PID [--force]]";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Kill { pid: u32, force: bool },
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut command = Command::Run;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "kill" => {
                let pid = args.next().context("kill needs a pid")?;
                let pid = parse_pid(&pid)?;
                let force = match args.next().as_deref() {
                    None => false,
                    Some("--force") | Some("-f") => true,
                    Some(other) => bail!("unexpected argument '{}'\n{}", other, USAGE),
                };
                command = Command::Kill { pid, force };
            }
            "--help" | "-h" => bail!(USAGE),
            other => bail!("unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    Ok(Args { config, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt::init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match args.command {
        Command::Run => App::new(config).run().await,
        Command::Kill { pid, force } => app::kill(&config, pid, force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Args> {
        parse_args(line.split_whitespace().map(str::to_string))
    }

    #[test]
    fn test_no_args_runs_with_defaults() {
        let args = parse("").unwrap();
        assert_eq!(args.config, None);
        assert_eq!(args.command, Command::Run);
    }

    #[test]
    fn test_config_path() {
        let args = parse("--config /etc/procwatch.toml").unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/procwatch.toml")));
        assert!(parse("--config").is_err());
    }

    #[test]
    fn test_kill_command() {
        let args = parse("-c cfg.toml kill 4242 --force").unwrap();
        assert_eq!(args.command, Command::Kill { pid: 4242, force: true });

        let args = parse("kill 17").unwrap();
        assert_eq!(args.command, Command::Kill { pid: 17, force: false });
    }

    #[test]
    fn test_kill_rejects_bad_pid() {
        assert!(parse("kill abc").is_err());
        assert!(parse("kill 0").is_err());
        assert!(parse("kill").is_err());
        assert!(parse("kill 12 --now").is_err());
    }
}
