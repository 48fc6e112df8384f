// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! HostPulse — password-gated health snapshot for a single host
//!
//! Serves a small browser client plus a JSON endpoint that reports:
//! - CPU model, hostname and uptime
//! - Memory totals
//! - An adaptive one-second sample of CPU, disk and network load

mod api;
mod audit;
mod auth;
mod monitoring;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

/// Single host health snapshot over HTTP
#[derive(Parser)]
#[command(name = "hostpulse", version, about = "Password-gated host health snapshot")]
struct Cli {
    /// HTTP port to listen on
    #[arg(short, long, default_value_t = 7359)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// HTTPS port, used only when the certificate and key load
    #[arg(long, default_value_t = 8443)]
    https_port: u16,

    /// TLS certificate path (PEM)
    #[arg(long, default_value = "cert.pem")]
    tls_cert: PathBuf,

    /// TLS private key path (PEM)
    #[arg(long, default_value = "privkey.pem")]
    tls_key: PathBuf,

    /// Directory holding the credential, integrity and access log files
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Directory holding client.html. Auto-detected if not set.
    #[arg(long)]
    web_dir: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hostpulse=info".parse().unwrap())
                .add_directive("actix_web=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let web_dir = cli.web_dir.clone().unwrap_or_else(find_web_dir);
    let shutdown = Arc::new(Notify::new());

    // A tampered credential file must stop us before any socket is bound
    let app_state = match api::AppState::new(&cli.data_dir, web_dir.clone(), shutdown.clone()) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            error!("Security check failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("");
    info!("  HostPulse v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Data dir:   {}", cli.data_dir.display());
    info!("  Web dir:    {}", web_dir.display());
    info!("  Setup done: {}", app_state.credentials.is_configured());

    // Try to load TLS config using OpenSSL, falling back to HTTP only if anything goes wrong
    let ssl_builder = {
        use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};

        if !cli.tls_cert.exists() || !cli.tls_key.exists() {
            info!("  Could not find HTTPS certificates. Running server in HTTP mode.");
            None
        } else {
            match SslAcceptor::mozilla_intermediate(SslMethod::tls()) {
                Err(e) => {
                    tracing::warn!("Failed to create SSL acceptor: {}; HTTP only", e);
                    None
                }
                Ok(mut builder) => {
                    if let Err(e) = builder.set_certificate_chain_file(&cli.tls_cert) {
                        tracing::warn!("Cannot load TLS cert '{}': {}; HTTP only", cli.tls_cert.display(), e);
                        None
                    } else if let Err(e) = builder.set_private_key_file(&cli.tls_key, SslFiletype::PEM) {
                        tracing::warn!("Cannot load TLS key '{}': {}; HTTP only", cli.tls_key.display(), e);
                        None
                    } else {
                        Some(builder)
                    }
                }
            }
        }
    };

    let http_bind = format!("{}:{}", cli.bind, cli.port);
    let state_http = app_state.clone();
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(state_http.clone())
            .configure(api::configure)
    })
    .bind(&http_bind)
    .map_err(|e| {
        error!("Failed to bind HTTP on {}: {}", http_bind, e);
        e
    })?
    .run();
    info!("  HTTP:       http://{}", http_bind);

    let https_server = match ssl_builder {
        Some(ssl_builder) => {
            let https_bind = format!("{}:{}", cli.bind, cli.https_port);
            let state_https = app_state.clone();
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(state_https.clone())
                    .configure(api::configure)
            })
            .bind_openssl(&https_bind, ssl_builder)
            .map_err(|e| {
                error!("Failed to bind HTTPS on {}: {}", https_bind, e);
                e
            })?
            .run();
            info!("  HTTPS:      https://{}", https_bind);
            Some(server)
        }
        None => None,
    };

    info!("");
    info!("  Please log in at the web page. Press CTRL + C to shut down.");
    info!("");

    // Stop every listener once a valid /shutdown has been answered
    let mut handles = vec![http_server.handle()];
    if let Some(server) = &https_server {
        handles.push(server.handle());
    }
    tokio::spawn(async move {
        shutdown.notified().await;
        info!("Server is shutting down...");
        for handle in handles {
            handle.stop(true).await;
        }
    });

    match https_server {
        Some(https_server) => {
            let (r1, r2) = tokio::join!(http_server, https_server);
            r1?;
            r2
        }
        None => http_server.await,
    }
}

/// Find the web directory by checking the usual locations
fn find_web_dir() -> PathBuf {
    let candidates = [
        // Development
        "web",
        // Installed
        "/opt/hostpulse/web",
        "/usr/share/hostpulse/web",
    ];

    for dir in &candidates {
        let path = PathBuf::from(dir);
        if path.join(api::CLIENT_PAGE).exists() {
            return path;
        }
    }

    // Fallback: client.html next to the binary's working directory
    PathBuf::from(".")
}
