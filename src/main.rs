#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use agent_runtime_core::adapters::{OnboardingAdapter, RuntimeEventAdapter, SystemAlertAdapter};
use agent_runtime_core::{AgentId, AgentRuntime, Config, HttpAdvisorTransport};
use clap::{Arg, ArgAction, Command};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let matches = Command::new("agent-runtime")
        .version(VERSION)
        .about("Autonomous operational agent: perceive, decide, govern, act")
        .subcommand(
            Command::new("run")
                .about("Start the agent's continuous sense loop")
                .arg(
                    Arg::new("env")
                        .short('e')
                        .long("env")
                        .value_name("ENVIRONMENT")
                        .help("Deployment environment (dev, stage, prod)")
                        .default_value("dev"),
                )
                .arg(
                    Arg::new("config-dir")
                        .long("config-dir")
                        .value_name("DIR")
                        .help("Directory containing <env>.toml configuration files")
                        .default_value("config"),
                )
                .arg(
                    Arg::new("demo-mode")
                        .long("demo-mode")
                        .action(ArgAction::SetTrue)
                        .help("Force demo-mode safety gating regardless of configuration"),
                ),
        )
        .subcommand(
            Command::new("emit")
                .about("Feed a single runtime event to the agent and print its decision")
                .arg(
                    Arg::new("env")
                        .short('e')
                        .long("env")
                        .value_name("ENVIRONMENT")
                        .default_value("dev"),
                )
                .arg(
                    Arg::new("config-dir")
                        .long("config-dir")
                        .value_name("DIR")
                        .default_value("config"),
                )
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .help("Path to a JSON file containing the event payload")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show the agent's memory stats and proof-log health for a cold-started instance")
                .arg(
                    Arg::new("env")
                        .short('e')
                        .long("env")
                        .value_name("ENVIRONMENT")
                        .default_value("dev"),
                )
                .arg(
                    Arg::new("config-dir")
                        .long("config-dir")
                        .value_name("DIR")
                        .default_value("config"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("run", sub_matches)) => {
            let mut config = load_config(sub_matches);
            if sub_matches.get_flag("demo-mode") {
                config.demo_mode = true;
            }
            init_tracing(&config.logging.level);
            let agent_id = AgentId::new();
            let env_name = config.env.clone();
            let onboarding_watch_path = config.perception.onboarding_watch_path.clone();
            let transport = HttpAdvisorTransport::new(
                config.advisor.base_url.clone(),
                config.advisor.timeout,
            );
            let runtime = match AgentRuntime::new(agent_id, config, transport) {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("failed to start agent runtime: {e}");
                    std::process::exit(1);
                }
            };
            runtime
                .register_adapter(Box::new(RuntimeEventAdapter::new(env_name)))
                .await;
            runtime
                .register_adapter(Box::new(SystemAlertAdapter::new()))
                .await;
            if let Some(path) = onboarding_watch_path {
                runtime
                    .register_adapter(Box::new(OnboardingAdapter::new(path)))
                    .await;
            }
            if let Err(e) = runtime.restore().await {
                eprintln!("warning: failed to restore prior state: {e}");
            }
            println!("agent {agent_id} running, Ctrl-C to stop");

            tokio::select! {
                _ = runtime.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("shutting down...");
                }
            }

            if let Err(e) = runtime.shutdown().await {
                eprintln!("failed to persist state on shutdown: {e}");
            }
        }
        Some(("emit", sub_matches)) => {
            let config = load_config(sub_matches);
            init_tracing(&config.logging.level);
            let file = sub_matches.get_one::<String>("file").unwrap();
            let contents = match std::fs::read_to_string(file) {
                Ok(contents) => contents,
                Err(e) => {
                    eprintln!("failed to read {file}: {e}");
                    std::process::exit(1);
                }
            };
            let event: serde_json::Value = match serde_json::from_str(&contents) {
                Ok(event) => event,
                Err(e) => {
                    eprintln!("failed to parse {file} as JSON: {e}");
                    std::process::exit(1);
                }
            };

            let agent_id = AgentId::new();
            let transport = HttpAdvisorTransport::new(
                config.advisor.base_url.clone(),
                config.advisor.timeout,
            );
            let runtime = match AgentRuntime::new(agent_id, config, transport) {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("failed to start agent runtime: {e}");
                    std::process::exit(1);
                }
            };
            let decision = runtime.handle_external_event(event).await;
            println!("{}", serde_json::to_string_pretty(&decision).unwrap());
        }
        Some(("status", sub_matches)) => {
            let config = load_config(sub_matches);
            init_tracing(&config.logging.level);
            let agent_id = AgentId::new();
            let transport = HttpAdvisorTransport::new(
                config.advisor.base_url.clone(),
                config.advisor.timeout,
            );
            let runtime = match AgentRuntime::new(agent_id, config, transport) {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("failed to start agent runtime: {e}");
                    std::process::exit(1);
                }
            };
            let stats = runtime.memory_stats().await;
            let health = runtime.proof_log_health();
            println!("agent_id: {agent_id}");
            println!("memory: {}", serde_json::to_string_pretty(&stats).unwrap());
            println!("proof_log: {}", serde_json::to_string_pretty(&health).unwrap());
        }
        _ => {
            println!("agent-runtime v{VERSION}");
            println!("Use --help for available commands");
        }
    }
}

/// Installs the global `tracing` subscriber, honoring `RUST_LOG` when set
/// and otherwise falling back to the configured level.
fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .try_init();
}

fn load_config(sub_matches: &clap::ArgMatches) -> Config {
    let env = sub_matches.get_one::<String>("env").unwrap();
    let config_dir = PathBuf::from(sub_matches.get_one::<String>("config-dir").unwrap());
    match Config::load(env, &config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}
