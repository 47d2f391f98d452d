
use pxgrid_stomp::{
    ConfigError, Credentials, ErrorPolicy, Session, SessionConfig, SessionError, SessionState,
    TlsOptions,
};
use tracing::info;

use super::args::Cli;
use super::exit_codes;

const EXIT_RECEIPT: &str = "px-subscribe-exit";

/// Connect, subscribe and print payloads until Ctrl-C or `--count`.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let config = build_config(cli).map_err(|e| format_config_error(&e))?;
    let mut session = Session::new(config);

    session.connect().await.map_err(|e| format_session_error(&e, &cli.url))?;
    info!(url = %cli.url, "connected");

    for topic in &cli.topic {
        let id = session
            .subscribe(topic)
            .await
            .map_err(|e| format_session_error(&e, &cli.url))?;
        info!(topic = %topic, id = %id, "subscribed");
    }

    if let Some(message) = &cli.send {
        for topic in &cli.topic {
            session
                .send(topic, message.as_bytes())
                .await
                .map_err(|e| format_session_error(&e, &cli.url))?;
        }
    }

    let mut received: u64 = 0;
    let outcome = loop {
        if cli.count.is_some_and(|limit| received >= limit) {
            break Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
            next = session.read_message() => match next {
                Ok(payload) => {
                    received += 1;
                    println!("{}", String::from_utf8_lossy(&payload));
                }
                Err(e) => break Err(format_session_error(&e, &cli.url)),
            }
        }
    };

    if session.state() == SessionState::Open {
        session
            .disconnect(Some(EXIT_RECEIPT))
            .await
            .map_err(|e| format_session_error(&e, &cli.url))?;
    }
    info!(messages = received, "done");
    outcome
}

fn build_config(cli: &Cli) -> Result<SessionConfig, ConfigError> {
    let credentials = Credentials::new(&cli.nodename, &cli.password);
    let mut config = SessionConfig::new(&cli.url, credentials)?;

    if config.url().scheme() == "wss" {
        let tls = TlsOptions {
            client_cert: cli.clientcert.clone(),
            client_key: cli.clientkey.clone(),
            server_ca: cli.servercert.clone(),
            insecure: cli.insecure,
        };
        config = config.with_tls(tls.build()?);
    }
    if let Some(host) = &cli.host {
        config = config.with_host(host);
    }

    let policy = if cli.fail_on_error {
        ErrorPolicy::Fail
    } else {
        ErrorPolicy::Log
    };
    Ok(config.with_ping_interval(Some(cli.ws_ping_interval)).with_error_policy(policy))
}

fn format_config_error(err: &ConfigError) -> (String, u8) {
    (
        format!("Configuration error: {}", err),
        exit_codes::CONFIG_ERROR,
    )
}

/// Format a session error with user-friendly messaging
fn format_session_error(err: &SessionError, url: &str) -> (String, u8) {
    match err {
        SessionError::Transport(e) => (
            format!("Connection to {} failed: {}", url, e),
            exit_codes::NETWORK_ERROR,
        ),
        SessionError::ConnectionLost(reason) => (
            format!("Connection lost: {}", reason),
            exit_codes::NETWORK_ERROR,
        ),
        SessionError::Cancelled => ("Cancelled".to_string(), exit_codes::NETWORK_ERROR),
        SessionError::Server(server_err) => {
            let mut message = format!("Broker error: {}", server_err.message);
            if let Some(body) = &server_err.body {
                message.push_str(&format!(" ({})", body));
            }
            (message, exit_codes::PROTOCOL_ERROR)
        }
        other => (
            format!("Protocol error: {}", other),
            exit_codes::PROTOCOL_ERROR,
        ),
    }
}
