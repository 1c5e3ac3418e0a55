//! Process entry point (§10.5): boots one engine for one instance and
//! serves the HTTP bridge and the streaming sync endpoint off the same
//! listener. `current_thread` flavor, not `rt-multi-thread` — §5 specifies
//! single-threaded cooperative scheduling per instance, and the reference
//! platform's own minimal standalone binary (`basic-server/src/main.rs`)
//! sets the same precedent.

use axum::routing::get;
use axum::Router;
use mindcache_engine::config::EngineOpts;
use mindcache_engine::engine::{Engine, EngineBuilder};
use mindcache_engine::http;
use mindcache_engine::session::ws;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let opts = EngineOpts::from_env();
	let listen = opts.listen.to_string();

	let engine: Engine = match EngineBuilder::new(opts).build().await {
		Ok(engine) => engine,
		Err(err) => {
			tracing::error!("FATAL: engine failed to boot: {}", err);
			std::process::exit(1);
		}
	};

	let sync_route = format!("/{}/{{instanceId}}", engine.opts.sync_path_prefix);
	let app: Router<Engine> =
		Router::new().route(&sync_route, get(ws::upgrade)).merge(http::router()).with_state(engine.clone());

	let app = app.layer(tower_http::trace::TraceLayer::new_for_http());

	let listener = match tokio::net::TcpListener::bind(&listen).await {
		Ok(listener) => listener,
		Err(err) => {
			tracing::error!("FATAL: cannot bind {}: {}", listen, err);
			std::process::exit(1);
		}
	};
	tracing::info!(
		"mindcache-engine serving instance '{}' on {} (sync prefix '/{}')",
		engine.opts.instance_id,
		listen,
		engine.opts.sync_path_prefix,
	);

	if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
		tracing::error!("FATAL: server error: {}", err);
		std::process::exit(1);
	}
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	tracing::info!("shutdown signal received");
}

// vim: ts=4
