use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use formula_controller::error::describe_error_code;
use formula_controller::eval::{Evaluator, FunctionRegistry};
use formula_controller::params::ParameterResolver;
use formula_controller::resource::{Parameter, ParameterType, Parameters};
use formula_controller::store::manifest;
use formula_controller::store::{
    MemoryResourceStore, MemorySecretStore, ResourceStore, TracingEventRecorder,
};
use formula_controller::{Controller, ControllerConfig, Reconciler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

/// Evaluate formulas and keep computed resources up to date
#[derive(Parser)]
#[command(name = "formulactl")]
#[command(about = "Formula controller - evaluate and reconcile computed-value resources", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a formula once and print the result
    Eval {
        /// The formula to evaluate
        formula: String,

        /// Parameter as name=type:value (type is number, string or secret; defaults to number)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// YAML file with secrets referenced by secret parameters
        #[arg(long)]
        secrets: Option<PathBuf>,

        /// Print the canonical formula and result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconcile resources from a manifest until interrupted
    Run {
        /// YAML file with the resources to reconcile
        #[arg(short = 'm', long)]
        manifests: PathBuf,

        /// YAML file with secrets referenced by secret parameters
        #[arg(long)]
        secrets: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ControllerConfig::load(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e} ({})", describe_error_code(e.code()));
            std::process::exit(1);
        }
    };

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("formulactl started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Eval {
            formula,
            params,
            secrets,
            json,
        } => run_eval(&config, &formula, &params, secrets.as_deref(), json).await,
        Commands::Run { manifests, secrets } => {
            run_controller(&config, &manifests, secrets.as_deref()).await
        }
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Parse `name=type:value`; a value without a known type prefix is a number
fn parse_param(raw: &str) -> anyhow::Result<(String, Parameter)> {
    let Some((name, spec)) = raw.split_once('=') else {
        bail!("invalid parameter {raw:?}, expected name=type:value");
    };
    if name.is_empty() {
        bail!("invalid parameter {raw:?}, name is empty");
    }

    let parameter = match spec.split_once(':') {
        Some(("number", value)) => Parameter::number(value),
        Some(("string", value)) => Parameter::string(value),
        Some(("secret", value)) => Parameter::secret(value),
        _ => Parameter {
            value: spec.to_string(),
            kind: ParameterType::Number,
        },
    };
    Ok((name.to_string(), parameter))
}

async fn secret_store(path: Option<&Path>) -> anyhow::Result<MemorySecretStore> {
    let store = MemorySecretStore::new();
    if let Some(path) = path {
        let secrets = manifest::load_secrets(path)
            .await
            .with_context(|| format!("Failed to load secrets from {}", path.display()))?;
        manifest::seed_secrets(&store, secrets).await;
    }
    Ok(store)
}

async fn run_eval(
    config: &ControllerConfig,
    formula: &str,
    params: &[String],
    secrets: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let parameters = params
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<anyhow::Result<Parameters>>()?;

    let resolver = ParameterResolver::new(Arc::new(secret_store(secrets).await?), config.resolution_mode());
    let evaluator = Evaluator::new(Arc::new(FunctionRegistry::standard(config.response_time_timeout)));
    let cancel = CancellationToken::new();

    let compiled = evaluator.compile(formula)?;
    let context = resolver.resolve(&parameters, &cancel).await?;
    let value = evaluator.evaluate(&compiled, &context, &cancel).await?;
    debug!(canonical = %compiled.canonical(), parameters = %parameters, "Evaluated");

    if json {
        let output = serde_json::json!({
            "formula": compiled.canonical(),
            "parameters": parameters.to_string(),
            "result": value.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", value);
    }
    Ok(())
}

async fn run_controller(
    config: &ControllerConfig,
    manifests: &Path,
    secrets: Option<&Path>,
) -> anyhow::Result<()> {
    let resources = MemoryResourceStore::new();
    let loaded = manifest::load_resources(manifests)
        .await
        .with_context(|| format!("Failed to load resources from {}", manifests.display()))?;
    let keys = manifest::apply_resources(&resources, loaded).await;

    let resolver = ParameterResolver::new(Arc::new(secret_store(secrets).await?), config.resolution_mode());
    let evaluator = Evaluator::new(Arc::new(FunctionRegistry::standard(config.response_time_timeout)));
    let reconciler = Reconciler::new(
        Arc::new(resources.clone()),
        Arc::new(TracingEventRecorder),
        resolver,
        evaluator,
        config,
    );

    let controller = Controller::new(reconciler, config);
    info!(resources = keys.len(), workers = config.workers, "Starting controller");
    for key in keys {
        controller.watch(key).await;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");
    controller.shutdown().await;

    for key in resources.keys().await {
        if let Some(resource) = resources.get(&key).await? {
            info!(resource = %key, result = %resource.status.result, "Final status");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        let (name, p) = parse_param("a=number:2.5").unwrap();
        assert_eq!(name, "a");
        assert_eq!(p, Parameter::number("2.5"));

        let (_, p) = parse_param("s=string:http://x:8080").unwrap();
        assert_eq!(p, Parameter::string("http://x:8080"));

        let (_, p) = parse_param("c=secret:ns/cred").unwrap();
        assert_eq!(p, Parameter::secret("ns/cred"));

        let (_, p) = parse_param("n=7").unwrap();
        assert_eq!(p, Parameter::number("7"));

        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["formulactl", "-vv", "eval", "a+1", "-p", "a=1"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Eval { ref params, .. } if params.len() == 1));

        let cli = Cli::try_parse_from(["formulactl", "run", "--manifests", "r.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { secrets: None, .. }));
    }
}
