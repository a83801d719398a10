use shs::{Authenticator as _, Config, PendingChallenge, ShsConfigurator};

const INSTANCE_NAME: &str = "my-instance";

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Requires GANDI_API_KEY in the environment (or the gandi CLI config).
    let mut configurator = ShsConfigurator::new(Config::new(INSTANCE_NAME))?;

    log::info!("resolving instance {INSTANCE_NAME}");
    configurator.prepare().await?;

    // Place a dummy validation file so the instance's serving of
    // `.well-known/acme-challenge/` can be checked by hand.
    let challenges = vec![PendingChallenge::new(
        "smoke-test-token",
        "smoke-test-token.not-a-real-key-authorization",
        (),
    )];

    for deployed in configurator.perform(challenges).await {
        deployed?;
    }

    log::info!(
        "deployed; check http://<your-domain>/.well-known/acme-challenge/smoke-test-token \
         then press enter to clean up"
    );
    std::io::stdin().read_line(&mut String::new())?;

    let challenges = [PendingChallenge::new("smoke-test-token", "", ())];
    configurator.cleanup(&challenges).await;

    Ok(())
}
