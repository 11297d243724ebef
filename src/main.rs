//! `marko-link` command line.
//!
//! ```text
//! marko-link entry-id <relative-path>...
//! marko-link inspect --root <dir> [--runtime-id <id>] [--store-dir <dir>]
//! ```

use std::env;
use std::path::PathBuf;
use std::process;

use marko_link::{to_entry_id, HandoffStore, PluginOptions};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: marko-link entry-id <relative-path>... | \
                     marko-link inspect --root <dir> [--runtime-id <id>] [--store-dir <dir>]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    EntryId(Vec<String>),
    Inspect {
        root: PathBuf,
        runtime_id: Option<String>,
        store_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("[marko-link] {}", err);
        process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    match parse_args(env::args().skip(1))? {
        Command::EntryId(paths) => {
            for path in paths {
                println!("{}\t{}", to_entry_id(&path), path);
            }
            Ok(())
        }
        Command::Inspect {
            root,
            runtime_id,
            store_dir,
        } => {
            let mut options = PluginOptions::default();
            if let Some(id) = runtime_id {
                options = options.with_runtime_id(id);
            }
            if let Some(dir) = store_dir {
                options = options.with_store_dir(dir);
            }

            let root = root
                .canonicalize()
                .map_err(|e| format!("cannot read root {}: {e}", root.display()))?;
            let store = HandoffStore::for_project(
                &options.store_dir(),
                &root,
                options.runtime_id.as_deref(),
            );
            let manifest = store.read().await.map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&manifest)
                .map_err(|e| format!("failed to print manifest: {e}"))?;
            println!("{json}");
            Ok(())
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let command = args.next().ok_or_else(|| USAGE.to_string())?;

    match command.as_str() {
        "entry-id" => {
            let paths: Vec<String> = args.collect();
            if paths.is_empty() {
                return Err(format!("entry-id needs at least one path. {USAGE}"));
            }
            Ok(Command::EntryId(paths))
        }
        "inspect" => {
            let mut root: Option<PathBuf> = None;
            let mut runtime_id = None;
            let mut store_dir = None;

            while let Some(arg) = args.next() {
                let mut value = |flag: &str| {
                    args.next()
                        .ok_or_else(|| format!("missing value for {flag}"))
                };
                match arg.as_str() {
                    "--root" => root = Some(PathBuf::from(value("--root")?)),
                    "--runtime-id" => runtime_id = Some(value("--runtime-id")?),
                    "--store-dir" => store_dir = Some(PathBuf::from(value("--store-dir")?)),
                    _ => return Err(format!("unknown argument '{arg}'. {USAGE}")),
                }
            }

            Ok(Command::Inspect {
                root: root.ok_or_else(|| "required flag missing: --root <dir>".to_string())?,
                runtime_id,
                store_dir,
            })
        }
        other => Err(format!("unknown command '{other}'. {USAGE}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_entry_id() {
        assert_eq!(
            parse_args(args(&["entry-id", "a.marko", "b/index.marko"])).unwrap(),
            Command::EntryId(vec!["a.marko".into(), "b/index.marko".into()])
        );
        assert!(parse_args(args(&["entry-id"])).is_err());
    }

    #[test]
    fn parses_inspect() {
        assert_eq!(
            parse_args(args(&["inspect", "--root", "/app", "--runtime-id", "web"])).unwrap(),
            Command::Inspect {
                root: PathBuf::from("/app"),
                runtime_id: Some("web".into()),
                store_dir: None,
            }
        );
        let err = parse_args(args(&["inspect", "--runtime-id"])).unwrap_err();
        assert!(err.contains("missing value for --runtime-id"));
        assert!(parse_args(args(&["inspect"])).unwrap_err().contains("--root"));
        assert!(parse_args(args(&["build"])).unwrap_err().contains("unknown command"));
    }
}
