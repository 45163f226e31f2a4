use crate::backend::local::detect_shell;
use crate::config::{
    BackendConfig, FileSystemConfig, LocalBackendConfig, get_settings, init_settings,
    parse_remote_vm_host,
};
use crate::fs::FileSystem;
use crate::server::http::HttpState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "constellation-fs")]
#[command(about = "Sandboxed workspace command and file execution for agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one workspace over stdio (protocol on stdout/stdin,
    /// diagnostics on stderr)
    Stdio {
        #[arg(long = "userId")]
        user_id: String,
        #[arg(long, default_value = "default")]
        workspace: String,
        #[arg(long = "workspaceRoot")]
        workspace_root: Option<PathBuf>,
        #[arg(long = "appId", default_value = "constellation")]
        app_id: String,
        /// Cap on decoded exec stdout
        #[arg(long = "maxOutputLength")]
        max_output_length: Option<usize>,
    },
    /// Serve many sessions over HTTP
    Http {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 9410)]
        port: u16,
        /// Bearer token required on every request
        #[arg(long = "authToken", env = "CONSTELLATION_AUTH_TOKEN")]
        auth_token: String,
        #[arg(long = "workspaceRoot")]
        workspace_root: Option<PathBuf>,
        #[arg(long = "appId", default_value = "constellation")]
        app_id: String,
        #[arg(long = "maxOutputLength")]
        max_output_length: Option<usize>,
    },
    /// Report environment readiness: shell, workspace root, remote config
    Check,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Stdio {
            user_id,
            workspace,
            workspace_root,
            app_id,
            max_output_length,
        } => {
            init_settings(&app_id, workspace_root)?;
            let config = FileSystemConfig {
                user_id,
                backend: BackendConfig::Local(LocalBackendConfig::default()),
                max_output_length,
            };
            let fs = FileSystem::new(config)?;
            let facade = fs
                .workspace(&workspace, None)
                .await
                .context("cannot prepare workspace")?;
            info!(workspace = %facade.path().display(), "serving stdio session");
            crate::server::stdio::serve(facade).await
        }
        Commands::Http {
            host,
            port,
            auth_token,
            workspace_root,
            app_id,
            max_output_length,
        } => {
            init_settings(&app_id, workspace_root)?;
            let state = HttpState::new(
                auth_token,
                BackendConfig::Local(LocalBackendConfig::default()),
                max_output_length,
            )?;
            crate::server::http::serve(&host, port, state).await
        }
        Commands::Check => check(),
    }
}

/// Environment diagnostics, one line per finding.
fn check() -> Result<()> {
    match detect_shell() {
        Ok(shell) => println!("shell: {shell}"),
        Err(e) => println!("shell: UNAVAILABLE ({e})"),
    }

    let root = match get_settings() {
        Ok(settings) => settings.workspace_root,
        Err(_) => std::env::var("CONSTELLATION_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("constellation-fs")),
    };
    let writable = std::fs::create_dir_all(&root).is_ok();
    println!(
        "workspace root: {} ({})",
        root.display(),
        if writable { "writable" } else { "NOT writable" }
    );

    let remote = std::env::var("REMOTE_VM_HOST").ok();
    match parse_remote_vm_host(remote.as_deref()) {
        Ok((user, host, port)) => println!("remote: {user}@{host}:{port}"),
        Err(e) => println!("remote: not configured ({e})"),
    }
    Ok(())
}
