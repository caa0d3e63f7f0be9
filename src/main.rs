//! Thin CLI surface over [`cluster_dump::dump::dump`]. Grounded in the
//! teacher's `src/cli.rs`/`src/main.rs`: a `clap`-derived `Cli` that inits
//! `tracing`, a flags struct that is a thin caller over the core entry
//! point (here `dump()` rather than the teacher's `GatherConfig::collect`),
//! and an `indicatif` progress bar layered above the `on_progress`
//! callback, which the core itself never references (SPEC_FULL.md §10).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cluster_dump::dump::{dump, DumpParams};
use cluster_dump::error::DumpError;
use cluster_dump::format::Format;
use cluster_dump::restclient::auth::ClusterEndpoint;
use cluster_dump::restclient::RestClient;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Controls the verbosity of the output.
    ///
    /// OneOf: OFF, ERROR, WARN, INFO, DEBUG, TRACE
    #[arg(short, long, default_value = "INFO", global = true)]
    verbosity: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn init_tracing(&self) {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env().add_directive(self.verbosity.into()))
            .init();
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every reachable API resource on the cluster to a local
    /// directory tree.
    Dump {
        #[command(flatten)]
        args: DumpArgs,
    },
}

#[derive(Parser)]
struct DumpArgs {
    /// Output directory. Cleared and recreated on every run.
    #[arg(short, long, value_name = "PATH")]
    root: PathBuf,

    /// Path to a kubeconfig file. Defaults to the in-pod service account,
    /// falling back to `$HOME/.kube/config`.
    #[arg(short, long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use. Defaults to `.current-context`.
    #[arg(long)]
    context: Option<String>,

    /// Skip TLS certificate verification against the cluster.
    #[arg(long, default_value_t = false)]
    insecure_skip_tls_verify: bool,

    /// Regex of namespace names to exclude. May be repeated.
    #[arg(long = "exclude-namespace", action = clap::ArgAction::Append)]
    exclude_namespaces: Vec<String>,

    /// `"<groupVersionRegex>,<kindRegex>"` of resources to exclude. Either
    /// side defaults to `.*` when empty. May be repeated.
    #[arg(long = "exclude-resource", action = clap::ArgAction::Append)]
    exclude_resources: Vec<String>,

    /// Skip collecting pod container logs.
    #[arg(long, default_value_t = false)]
    no_logs: bool,

    /// Gzip-compress every written file.
    #[arg(long, default_value_t = false)]
    gzip: bool,

    /// Output serialization format.
    #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
    format: Format,

    /// Maximum number of concurrent resource workers. `<= 0` is unbounded.
    #[arg(short, long, default_value_t = 0)]
    pool_size: isize,
}

impl DumpArgs {
    async fn run(self) -> Result<(), DumpError> {
        let endpoint = if self.kubeconfig.is_some() || self.context.is_some() {
            ClusterEndpoint::from_kubeconfig_context(
                self.kubeconfig.clone(),
                self.context.clone(),
                self.insecure_skip_tls_verify,
            )
            .await?
        } else {
            ClusterEndpoint::infer().await?
        };

        let client = RestClient::new(endpoint.client());

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} dumped {pos} resources").expect("static template is valid"),
        );
        let bar_for_progress = bar.clone();

        let params = DumpParams {
            root: &self.root,
            namespace_excludes: &self.exclude_namespaces,
            gvk_excludes: &self.exclude_resources,
            no_logs: self.no_logs,
            gzip: self.gzip,
            format: self.format,
            pool_size: self.pool_size,
        };

        let result = dump(
            client,
            params,
            Some(Box::new(move || bar_for_progress.inc(1))),
        )
        .await;
        bar.finish_and_clear();
        result
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.init_tracing();

    let Commands::Dump { args } = cli.command;
    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            exit_code(&e)
        }
    }
}

/// Stable exit-code mapping per §6: 0 success, 1-8 map to specific
/// early-failure steps.
fn exit_code(err: &DumpError) -> ExitCode {
    let code: u8 = match err {
        DumpError::Config(_) => 1,
        DumpError::Auth(_) => 2,
        DumpError::Discovery(_) => 3,
        DumpError::Transform { .. } => 4,
        DumpError::Http { .. } => 5,
        DumpError::Writer(_) => 6,
        DumpError::AggregateWorker(..) => 7,
    };
    ExitCode::from(code)
}
