//! Example shell server.
//!
//! Run with: cargo run -p console-server [config.json]
//!
//! Then open http://localhost:3000 in your browser and type `help`.

mod commands;

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context as _;
use axum::{
    Router,
    response::{Html, IntoResponse},
    routing::get,
};
use embedded_shell_core::{SessionStore, ShellConfig};
use embedded_shell_executor::{
    CommandDescriptor, CommandRegistry, ContextKind, Invocation, ParamSpec, render_help,
};
use embedded_shell_session::{Dispatcher, KvSessionStore};
use embedded_shell_transport::websocket::create_ws_router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ShellConfig::load(config_path.as_deref()).context("loading configuration")?;

    let store: Arc<dyn SessionStore> = Arc::new(
        KvSessionStore::from_config(&config.store)
            .await
            .context("building session store")?,
    );
    let help_registry = Arc::new(OnceLock::new());
    let mut descriptors = commands::all();
    descriptors.push(help_command(Arc::clone(&help_registry)));
    let registry = CommandRegistry::build(descriptors).context("building command registry")?;
    let _ = help_registry.set(registry.clone());

    let dispatcher = Dispatcher::new(registry, store, config.clone());
    let reaper = dispatcher.spawn_reaper(Duration::from_secs(60));

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(dispatcher))
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    reaper.abort();
    Ok(())
}

/// `help [-c command]`: prints the grouped command list, or one command's options.
///
/// The registry does not exist yet when this descriptor is built; it is filled
/// into `registry` once construction succeeds.
fn help_command(registry: Arc<OnceLock<CommandRegistry>>) -> CommandDescriptor {
    CommandDescriptor::new("help", move |inv: Invocation| {
        let ctx = inv.require_context()?;
        let registry = registry.get().context("command registry not initialized")?;
        let text = render_help(registry, inv.args().string("command").ok())?;
        for line in text.lines() {
            ctx.printf(line);
        }
        ctx.completed();
        Ok(())
    })
    .group("Built-in commands")
    .help("Lists commands, or shows one command's options")
    .param(ParamSpec::context(ContextKind::Simple))
    .param(
        ParamSpec::string("command")
            .short("c")
            .optional()
            .help("Command to describe"),
    )
}

async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Embedded Shell</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: Menlo, Monaco, "Courier New", monospace;
        }
        #output { white-space: pre-wrap; height: calc(100vh - 120px); overflow-y: auto; }
        #line { width: 100%; background: #252526; color: #d4d4d4; border: 1px solid #444; padding: 6px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .error { color: #e55; }
        .progress { color: #6a6; }
    </style>
</head>
<body>
    <div class="status" id="status">Connecting...</div>
    <div id="output"></div>
    <input id="line" placeholder="sum2 -a 1 -b 2   (Ctrl+C interrupts the last command)" autofocus />

    <script>
        const output = document.getElementById('output');
        const status = document.getElementById('status');
        const input = document.getElementById('line');
        let ws;
        let current = null;

        function print(text, cls) {
            const div = document.createElement('div');
            if (cls) div.className = cls;
            div.textContent = text;
            output.appendChild(div);
            output.scrollTop = output.scrollHeight;
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);
            ws.onopen = () => {
                status.textContent = 'Connected';
                let id = localStorage.getItem('shell-session');
                if (!id) {
                    id = crypto.randomUUID();
                    localStorage.setItem('shell-session', id);
                }
                ws.send(JSON.stringify({ type: 'open_session', session_id: id }));
            };
            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                setTimeout(connect, 2000);
            };
            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                switch (msg.type) {
                    case 'session_opened': status.textContent = `Session ${msg.session_id}`; break;
                    case 'started': current = msg.invocation_id; break;
                    case 'line': print(msg.text); break;
                    case 'progress': {
                        const pct = msg.progress.fraction != null ? ` [${Math.round(msg.progress.fraction * 100)}%]` : '';
                        print(msg.message + pct, 'progress');
                        break;
                    }
                    case 'completed': if (msg.message) print(msg.message); current = null; break;
                    case 'failed': print(`${msg.reason}: ${msg.message}`, 'error'); current = null; break;
                    case 'error': print(`${msg.code}: ${msg.message}`, 'error'); break;
                }
            };
        }

        input.addEventListener('keydown', (e) => {
            if (e.key === 'Enter' && input.value.trim()) {
                print('$> ' + input.value);
                ws.send(JSON.stringify({ type: 'execute', line: input.value }));
                input.value = '';
            } else if (e.key === 'c' && e.ctrlKey && current) {
                ws.send(JSON.stringify({ type: 'interrupt', invocation_id: current }));
            }
        });

        connect();
    </script>
</body>
</html>
"#;
