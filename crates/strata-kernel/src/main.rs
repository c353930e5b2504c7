use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_catalog::{Catalog, Declaration};
use strata_kernel::config::{FailurePolicy, ProvisionConfig};
use strata_kernel::error::{FailureReport, ProvisionError};
use strata_kernel::local::LocalProvider;
use strata_kernel::provisioner::Provisioner;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn cli() -> Command {
    let file = Arg::new("file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Declaration document (.yaml, .toml or .json)");
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");

    Command::new("strata")
        .version(strata_kernel::VERSION)
        .about("Two-tier infrastructure provisioning")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format (logs go to stderr)"),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a declaration without contacting any provider")
                .arg(file.clone()),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the creation batches and dependencies")
                .arg(file.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("apply")
                .about("Provision against the local rehearsal provider")
                .arg(file)
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Provisioning config (TOML)"),
                )
                .arg(
                    Arg::new("on-failure")
                        .long("on-failure")
                        .value_parser(value_parser!(FailurePolicy))
                        .help("continue-independent or halt-all"),
                )
                .arg(
                    Arg::new("max-parallel")
                        .long("max-parallel")
                        .value_parser(value_parser!(usize))
                        .help("Maximum concurrent creations per batch"),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .value_parser(value_parser!(u32))
                        .help("Provider calls allowed per resource, first attempt included"),
                )
                .arg(json),
        )
}

fn init_logging(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_catalog(path: &Path) -> Result<Catalog, ProvisionError> {
    let decl = Declaration::load(path)?;
    let catalog = Catalog::from_declaration(decl)?;
    tracing::debug!(
        path = %path.display(),
        resources = catalog.len(),
        outputs = catalog.outputs().len(),
        "declaration loaded"
    );
    Ok(catalog)
}

fn file_arg(args: &ArgMatches) -> anyhow::Result<&PathBuf> {
    args.get_one::<PathBuf>("file")
        .context("missing declaration file")
}

fn apply_config(args: &ArgMatches) -> anyhow::Result<ProvisionConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => ProvisionConfig::load(path).map_err(ProvisionError::from)?,
        None => ProvisionConfig::default(),
    };
    if let Some(policy) = args.get_one::<FailurePolicy>("on-failure") {
        config = config.with_failure_policy(*policy);
    }
    if let Some(max) = args.get_one::<usize>("max-parallel") {
        config = config.with_max_parallel(*max);
    }
    if let Some(attempts) = args.get_one::<u32>("max-attempts") {
        let retry = config.retry.with_max_attempts(*attempts);
        config = config.with_retry(retry);
    }
    config.validate().map_err(ProvisionError::from)?;
    Ok(config)
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("validate", args)) => {
            let path = file_arg(args)?;
            let catalog = load_catalog(path)?;
            Provisioner::plan(&catalog)?;
            println!(
                "{}: {} resource(s), {} output(s), no errors",
                path.display(),
                catalog.len(),
                catalog.outputs().len()
            );
        }
        Some(("plan", args)) => {
            let catalog = load_catalog(file_arg(args)?)?;
            let plan = Provisioner::plan(&catalog)?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{plan}");
            }
        }
        Some(("apply", args)) => {
            let catalog = load_catalog(file_arg(args)?)?;
            let config = apply_config(args)?;
            let provisioner = Provisioner::new(Arc::new(LocalProvider::new())).with_config(config);

            let abort = provisioner.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing in-flight creations");
                    abort.abort();
                }
            });

            let convergence = provisioner.apply(&catalog).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&convergence)?);
            } else {
                print!("{}", convergence.outputs);
            }
        }
        _ => anyhow::bail!("unknown command"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(
        matches
            .get_one::<String>("log-format")
            .map_or("text", String::as_str),
    );

    if let Err(err) = run(&matches).await {
        let report = match err.downcast_ref::<ProvisionError>() {
            Some(e) => e.report(),
            None => FailureReport {
                kind: "Error",
                resource: None,
                message: format!("{err:#}"),
            },
        };
        tracing::error!(kind = report.kind, "{}", report.message);
        match serde_json::to_string(&report) {
            Ok(json) => eprintln!("{json}"),
            Err(_) => eprintln!("{}: {}", report.kind, report.message),
        }
        std::process::exit(1);
    }
}
