// src/main.rs
use env_logger::Env;
use log::{error, info};
use std::process::ExitCode;
use vtserverlist::board::BoardPublisher;
use vtserverlist::config::Config;
use vtserverlist::discord::DiscordClient;
use vtserverlist::poll::PollCycle;
use vtserverlist::query::A2sClient;
use vtserverlist::scheduler::{AppContext, Scheduler};
use vtserverlist::storage::roster::Roster;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded configuration: {:?}", config);

    let roster = match Roster::load(&config.servers_file) {
        Ok(roster) => roster,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let discord = match DiscordClient::connect(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to log in to Discord: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let context = AppContext {
        roster,
        poll: PollCycle::new(A2sClient::new(config.query_timeout()), config.max_concurrent_queries),
        publisher: BoardPublisher::new(discord),
        interval: config.update_interval(),
    };

    let mut scheduler = Scheduler::new(context);
    let e = scheduler.run_forever().await;
    error!("Server list stopped after {} updates: {}", scheduler.completed_cycles(), e);
    ExitCode::FAILURE
}
