use anyhow::Context;
use clap::Parser;
use greeter_lb_client::client::{
    config::{ClientConfig, CliArgs},
    connect::connect,
    dispatch::dispatch,
    policy::ServiceConfig,
};
use greeter_lb_core::{
    config::Config,
    shutdown::{Coordinator, Guard, Outcome, Signal, Signals},
    telemetry::init_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    init_telemetry()?;

    let res = run(config).await;
    tracing::info!("main: Completed");
    res
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let settings = Config::load(config.env_file.as_deref()).context("reading config")?;
    let service_config = ServiceConfig::new(config.policy)
        .to_json()
        .context("encoding service config")?;

    let connection = Guard::new(
        connect(
            &settings.service_target_address,
            &service_config,
            &config.connect,
        )
        .await
        .context("dialing")?,
    );
    tracing::info!(
        "Calling {} with {} as {:?}",
        connection.target(),
        connection.policy(),
        config.dispatch.name
    );

    let signals = Signals::install()?;
    let client = connection.client();
    let options = config.dispatch;

    let outcome = Coordinator::new(config.drain_timeout)
        .run(
            move |stop| async move {
                let done = dispatch(client, &options, stop, |message| println!("{message}")).await?;
                tracing::info!("Completed {done} call(s)");
                Ok::<_, greeter_lb_core::Error>(())
            },
            wait_for_signal(signals),
        )
        .await;
    connection.release();

    match outcome {
        Outcome::Completed | Outcome::Signalled(_) => Ok(()),
        Outcome::Failed(e) => Err(anyhow::Error::new(e).context("client error")),
        Outcome::Panicked(e) => Err(anyhow::Error::new(e).context("client error")),
    }
}

async fn wait_for_signal(mut signals: Signals) -> Signal {
    signals.recv().await
}
