//! Command-line interface for Databend Cloud.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use bendcloud::{
    CancellationToken, CloudConnection, CloudConnectionOptsBuilder, CloudError, ErrorKind,
    FileCredentialStore, QueryEvent, WarehouseSize, config::ConfigFile,
};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

/// Command-line interface for Databend Cloud.
#[derive(Debug, Parser)]
#[clap(name = "bendsql", version)]
struct Cli {
    /// Log protocol decisions to stderr.
    #[clap(long, global = true)]
    debug: bool,

    /// Use this org instead of the one saved at login.
    #[clap(long, global = true)]
    org: Option<String>,

    /// Path of the config file. Defaults to `config.json` under `$BENDSQL_CONFIG_DIR`
    /// or the platform config dir.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Account operations.
    #[clap(subcommand)]
    Auth(AuthCommand),
    /// Warehouse lifecycle operations.
    #[clap(subcommand)]
    Warehouse(WarehouseCommand),
    /// Run SQL and print the rows.
    Query(QueryArgs),
    /// Stage operations.
    #[clap(subcommand)]
    Stage(StageCommand),
    /// Save the default org and warehouse. Uses `--org` when given.
    Configure {
        #[clap(long)]
        warehouse: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    Login {
        #[clap(long, env = "BENDSQL_EMAIL")]
        email: String,
        #[clap(long, env = "BENDSQL_PASSWORD", hide_env_values = true)]
        password: String,
        /// Org to select. Defaults to the first org the account belongs to.
        #[clap(long = "select-org")]
        select_org: Option<String>,
        /// API endpoint to save, e.g. app.databend.cn
        #[clap(long)]
        endpoint: Option<String>,
    },
    /// Sign in with an existing access and refresh token pair.
    Token {
        #[clap(long, env = "BENDSQL_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        #[clap(long, env = "BENDSQL_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
        /// Org to select. Defaults to the account's default org.
        #[clap(long = "select-org")]
        select_org: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum WarehouseCommand {
    /// Show one warehouse, or the saved default.
    Status { name: Option<String> },
    /// List the org's warehouses.
    Ls,
    Resume {
        name: String,
        /// Block until the warehouse is running.
        #[clap(long)]
        wait: bool,
    },
    Suspend { name: String },
    Create {
        name: String,
        #[clap(long, default_value = "Small")]
        size: WarehouseSize,
        #[clap(long)]
        wait: bool,
    },
    Delete { name: String },
    /// Make `name` the default warehouse.
    Use { name: String },
}

#[derive(Debug, Args)]
struct QueryArgs {
    sql: String,
    #[clap(long)]
    warehouse: Option<String>,
}

#[derive(Debug, Subcommand)]
enum StageCommand {
    /// List the stages, or the files under `@stage[/path]`.
    Ls {
        stage: Option<String>,
        #[clap(long)]
        warehouse: Option<String>,
    },
    /// Upload a local file into `@stage/<file name>`.
    Upload {
        stage: String,
        file: PathBuf,
        #[clap(long)]
        warehouse: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message());
            if let Some(hint) = err.hint() {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CloudError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => ConfigFile::default_path()?,
    };
    let config = ConfigFile::load(&config_path)?;

    let warehouse_override = match &cli.command {
        Command::Query(args) => args.warehouse.clone(),
        Command::Stage(StageCommand::Upload { warehouse, .. })
        | Command::Stage(StageCommand::Ls { warehouse, .. }) => warehouse.clone(),
        _ => None,
    };
    let endpoint_override = match &cli.command {
        Command::Auth(AuthCommand::Login { endpoint, .. }) => endpoint.clone(),
        _ => None,
    };

    let mut opts = CloudConnectionOptsBuilder::default();
    opts.org(cli.org.clone().unwrap_or_else(|| config.org.clone()));
    if let Some(endpoint) = endpoint_override.as_deref().or(config.endpoint()) {
        opts.endpoint(endpoint);
    }
    if let Some(warehouse) = warehouse_override.as_deref().or(config.warehouse()) {
        opts.warehouse(warehouse);
    }
    let opts = opts
        .build()
        .map_err(|e| CloudError::from_message(ErrorKind::BadRequest, e.to_string()))?;

    let store = Arc::new(FileCredentialStore::new(config_path.clone()));
    let conn = opts.connect(store);

    match cli.command {
        Command::Auth(AuthCommand::Login {
            email,
            password,
            select_org,
            endpoint,
        }) => {
            conn.login(&email, &password).await?;
            save_context(&conn, &config_path, select_org.as_deref(), None, endpoint).await
        }
        Command::Auth(AuthCommand::Token {
            access_token,
            refresh_token,
            select_org,
        }) => {
            let account = conn
                .session()
                .login_with_token(&access_token, &refresh_token)
                .await?;
            let org = select_org.unwrap_or(account.default_org_slug);
            println!("signed in as {}", account.email);
            save_context(&conn, &config_path, Some(&org), None, None).await
        }
        Command::Configure { warehouse } => {
            save_context(&conn, &config_path, cli.org.as_deref(), warehouse.as_deref(), None).await
        }
        Command::Warehouse(cmd) => warehouse(&conn, &config_path, &config, cmd).await,
        Command::Stage(StageCommand::Ls { stage, .. }) => {
            for row in conn.stage().list(conn.context(), stage.as_deref()).await? {
                print_row(&row);
            }
            Ok(())
        }
        Command::Query(args) => query(&conn, args.sql).await,
        Command::Stage(StageCommand::Upload { stage, file, .. }) => {
            let data = std::fs::read(&file).map_err(|e| {
                CloudError::from_message(
                    ErrorKind::BadRequest,
                    format!("failed to read {}: {}", file.display(), e),
                )
            })?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            conn.stage()
                .upload(conn.context(), &stage, &file_name, data)
                .await?;
            println!("uploaded {} to @{}", file_name, stage.trim_start_matches('@'));
            Ok(())
        }
    }
}

/// Resolves org and warehouse against the account and saves them.
async fn save_context(
    conn: &CloudConnection<reqwest::Client>,
    config_path: &Path,
    org: Option<&str>,
    warehouse: Option<&str>,
    endpoint: Option<String>,
) -> Result<(), CloudError> {
    let ctx = conn.resolve_context(org, warehouse).await?;

    // the token was written through the store, keep it
    ConfigFile::update(config_path, |cfg| {
        cfg.org = ctx.org().to_string();
        cfg.warehouse = ctx.warehouse().unwrap_or_default().to_string();
        if let Some(endpoint) = endpoint {
            cfg.endpoint = endpoint;
        }
    })?;

    match ctx.warehouse() {
        Some(warehouse) => println!("using org {}, warehouse {}", ctx.org(), warehouse),
        None => println!("using org {}, no warehouse yet", ctx.org()),
    }
    Ok(())
}

async fn warehouse(
    conn: &CloudConnection<reqwest::Client>,
    config_path: &Path,
    config: &ConfigFile,
    cmd: WarehouseCommand,
) -> Result<(), CloudError> {
    let ctx = conn.context();
    let wh = conn.warehouses();

    match cmd {
        WarehouseCommand::Status { name } => {
            let name = name
                .or_else(|| config.warehouse().map(str::to_string))
                .ok_or_else(|| {
                    CloudError::from_message(ErrorKind::BadRequest, "no warehouse given or saved")
                })?;
            println!("{}", wh.view(ctx, &name).await?);
        }
        WarehouseCommand::Ls => {
            for status in wh.list(ctx).await? {
                println!("{}", status);
            }
        }
        WarehouseCommand::Resume { name, wait } => {
            if wait {
                println!("{}", conn.resume_and_wait(&name).await?);
            } else {
                wh.resume(ctx, &name).await?;
            }
        }
        WarehouseCommand::Suspend { name } => wh.suspend(ctx, &name).await?,
        WarehouseCommand::Create { name, size, wait } => {
            if wait {
                println!("{}", conn.create_and_wait(&name, size).await?);
            } else {
                wh.create(ctx, &name, size).await?;
            }
        }
        WarehouseCommand::Delete { name } => wh.delete(ctx, &name).await?,
        WarehouseCommand::Use { name } => {
            // fails with NotFound before anything is saved
            let status = wh.view(ctx, &name).await?;
            ConfigFile::update(config_path, |cfg| cfg.warehouse = status.name.clone())?;
            println!("now using warehouse {}", status);
        }
    }

    Ok(())
}

async fn query(conn: &CloudConnection<reqwest::Client>, sql: String) -> Result<(), CloudError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stream = conn.query(sql, cancel);
    while let Some(event) = stream.next().await {
        match event? {
            QueryEvent::Page(page) => {
                for row in page.data {
                    print_row(&row);
                }
            }
            QueryEvent::Done(summary) => {
                eprintln!(
                    "query {}: {} rows read, {} bytes, {:.3}s",
                    summary.query_id,
                    summary.stats.scan_progress.rows,
                    summary.stats.scan_progress.bytes,
                    summary.stats.running_time_ms / 1000.0
                );
            }
        }
    }

    Ok(())
}

fn print_row(row: &[serde_json::Value]) {
    let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
    println!("{}", cells.join("\t"));
}
