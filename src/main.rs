use std::str::FromStr;
use std::sync::Arc;

use proc_qq::Authentication;
use proc_qq::ClientBuilder;
use proc_qq::DeviceSource::JsonFile;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::mods::{join_logs, results};
use crate::recorder::JoinLogs;

mod config;
mod event;
mod mods;
mod payload;
mod query;
mod recorder;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv()?;
    let config = Config::from_env()?;

    init_tracing_subscriber(&config)?;

    let plugin = Arc::new(JoinLogs::open(&config)?);
    plugin.initialize();
    join_logs::install(plugin.clone())?;

    let client = ClientBuilder::new()
        .version(&proc_qq::re_exports::ricq::version::IPAD)
        .device(JsonFile("device.json".to_owned()))
        .authentication(Authentication::UinPassword(
            config.number,
            config.password.clone(),
        ))
        .modules(vec![join_logs::module()])
        .result_handlers(vec![results::on_result {}.into()])
        .build()
        .await?;

    let run = client.start().await;
    plugin.terminate();
    run??;
    Ok(())
}

fn init_tracing_subscriber(config: &Config) -> anyhow::Result<()> {
    let lvl = Level::from_str(&config.level)?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .without_time(),
        )
        .with(
            tracing_subscriber::filter::Targets::new()
                .with_target("ricq", lvl)
                .with_target("proc_qq", lvl)
                .with_target("join_logs", lvl),
        )
        .init();
    Ok(())
}
