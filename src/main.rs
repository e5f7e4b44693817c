use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

use dbexec::{Config, DbValue, Executor, Parameter, UnmappedTypePolicy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Opts {
    /// Path to config file
    #[arg(short, long)]
    config: Option<String>,

    /// Database connection URL
    #[arg(short, long)]
    database: Option<String>,

    /// Database login
    #[arg(short, long)]
    login: Option<String>,

    /// Database password
    #[arg(short, long)]
    password: Option<String>,

    /// Disable auto-commit and commit after the statement
    #[arg(long)]
    fix_auto_commit: bool,

    /// Write NULL parameters as literals into the query
    #[arg(long)]
    null_substitution: bool,

    /// Reject parameters without wire type mapping
    #[arg(long)]
    strict_types: bool,

    /// Execute as stored procedure call, parameters given as `out` are output parameters
    #[arg(long)]
    call: bool,

    /// Print effective config
    #[arg(long)]
    print_config: bool,

    /// Log filter, e.g. `debug` or `dbexec::executor=trace,sqlx=warn`
    #[arg(short, long)]
    verbose: Option<String>,

    /// SQL statement with `?` placeholders
    query: Option<String>,

    /// Positional parameters
    params: Vec<String>,
}

fn log_filter(cli_opts: &Opts) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(cli_opts.verbose.as_deref().unwrap_or_default())
}

fn init_logger(cli_opts: &Opts) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli_opts))
        .with_writer(std::io::stderr);
    if let Err(err) = subscriber.try_init() {
        eprintln!("Cannot initialize logger: {err}");
    }
}

fn main() -> anyhow::Result<()> {
    let cli_opts = Opts::parse();
    init_logger(&cli_opts);

    let mut config = if let Some(config_path) = &cli_opts.config {
        info!("Loading config file {config_path}");
        let f = std::fs::File::open(config_path)?;
        serde_yaml::from_reader(f)?
    } else {
        Config::default()
    };

    if let Some(database) = &cli_opts.database {
        config.db.url = Url::parse(database)?;
    }
    if cli_opts.login.is_some() {
        config.db.login = cli_opts.login.clone();
    }
    if cli_opts.password.is_some() {
        config.db.password = cli_opts.password.clone();
    }
    config.db.fix_auto_commit |= cli_opts.fix_auto_commit;
    config.db.null_substitution |= cli_opts.null_substitution;
    if cli_opts.strict_types {
        config.db.unmapped_types = UnmappedTypePolicy::Reject;
    }

    if cli_opts.print_config {
        let yaml = serde_yaml::to_string(&config)?;
        println!("{}", yaml);
        return Ok(());
    }

    let Some(query) = &cli_opts.query else {
        anyhow::bail!("No query given");
    };

    info!("Connecting to database: {}", config.db.url);
    let executor = Executor::from_config(&config.db)?;

    if cli_opts.call {
        let mut params: Vec<Parameter> = cli_opts
            .params
            .iter()
            .map(|p| if p == "out" { Parameter::output() } else { Parameter::input(DbValue::parse_literal(p)) })
            .collect();
        let records = executor.execute_call(query, &mut params)?;
        let out: Vec<&DbValue> = params.iter().filter(|p| p.is_out()).map(Parameter::value).collect();
        if !out.is_empty() {
            println!("{}", serde_yaml::to_string(&out)?);
        }
        if !records.is_empty() {
            println!("{}", serde_yaml::to_string(&records)?);
        }
    } else {
        let values: Vec<DbValue> = cli_opts.params.iter().map(|p| DbValue::parse_literal(p)).collect();
        let records = executor.execute_query(query, &values)?;
        println!("{}", serde_yaml::to_string(&records)?);
    }
    Ok(())
}
