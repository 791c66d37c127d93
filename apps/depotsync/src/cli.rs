//! Command line parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

pub const USAGE: &str = "\
usage: depotsync <app_id> [--token TOKEN] [--mirror PATH] [--deadline SECS] [--json]
       depotsync compact [PATH]
       depotsync quota [--token TOKEN]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run {
        app_id: i64,
        token: Option<String>,
        mirror: Option<PathBuf>,
        deadline: Option<Duration>,
        json: bool,
    },
    Compact {
        mirror: Option<PathBuf>,
    },
    Quota {
        token: Option<String>,
    },
}

pub fn parse<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        bail!("missing app id");
    };

    match first.as_str() {
        "compact" => {
            let mirror = args.next().map(PathBuf::from);
            if let Some(extra) = args.next() {
                bail!("unexpected argument: {extra}");
            }
            Ok(Command::Compact { mirror })
        }
        "quota" => {
            let mut token = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--token" => token = Some(value(&mut args, "--token")?),
                    other => bail!("unexpected argument: {other}"),
                }
            }
            Ok(Command::Quota { token })
        }
        raw => {
            let app_id = raw
                .parse::<i64>()
                .with_context(|| format!("not an app id: {raw}"))?;
            let mut token = None;
            let mut mirror = None;
            let mut deadline = None;
            let mut json = false;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--token" => token = Some(value(&mut args, "--token")?),
                    "--mirror" => mirror = Some(PathBuf::from(value(&mut args, "--mirror")?)),
                    "--deadline" => {
                        let secs: u64 = value(&mut args, "--deadline")?
                            .parse()
                            .context("--deadline expects whole seconds")?;
                        deadline = Some(Duration::from_secs(secs));
                    }
                    "--json" => json = true,
                    other => bail!("unexpected argument: {other}"),
                }
            }
            Ok(Command::Run {
                app_id,
                token,
                mirror,
                deadline,
                json,
            })
        }
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next().with_context(|| format!("{flag} needs a value"))
}
